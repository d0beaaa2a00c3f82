//! 数据库连接
//!
//! 每个工作线程独占一个原生连接，连接只在该线程上被访问

use rat_logger::{debug, warn};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Connection, MySqlConnection, Row as _, SqliteConnection};

use crate::error::ProcedureResult;
use crate::procedure_error;
use crate::types::{DataValue, DatabaseType, ExecResult, QueryKind, QueryOutput, Row};

/// 原生数据库连接
#[derive(Debug)]
pub enum DatabaseConnection {
    MySQL(MySqlConnection),
    SQLite(SqliteConnection),
}

/// 按位置绑定参数
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                DataValue::Null => query.bind(Option::<String>::None),
                DataValue::Bool(b) => query.bind(*b),
                DataValue::Int(i) => query.bind(*i),
                DataValue::Float(f) => query.bind(*f),
                DataValue::String(s) => query.bind(s.clone()),
                DataValue::Bytes(bytes) => query.bind(bytes.clone()),
                DataValue::DateTime(dt) => query.bind(*dt),
                DataValue::Json(json) => query.bind(json.to_string()),
            };
        }
        query
    }};
}

impl DatabaseConnection {
    /// 建立连接并执行首次 ping
    pub async fn connect(dsn: &str) -> ProcedureResult<Self> {
        let db_type = DatabaseType::from_dsn(dsn)?;
        let connected = match db_type {
            DatabaseType::MySQL => MySqlConnection::connect(dsn).await.map(Self::MySQL),
            DatabaseType::SQLite => SqliteConnection::connect(dsn).await.map(Self::SQLite),
        };
        let mut connection = connected.map_err(|e| {
            procedure_error!(connection, format!("{}连接失败: {}", db_type.as_str(), e))
        })?;

        connection.ping().await.map_err(|e| {
            procedure_error!(connection, format!("{}首次 ping 失败: {}", db_type.as_str(), e))
        })?;
        debug!("{}连接已建立", db_type.as_str());
        Ok(connection)
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DatabaseConnection::MySQL(_) => DatabaseType::MySQL,
            DatabaseConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// 检测连接是否存活
    pub async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match self {
            DatabaseConnection::MySQL(conn) => conn.ping().await,
            DatabaseConnection::SQLite(conn) => conn.ping().await,
        }
    }

    /// 关闭连接
    pub async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            DatabaseConnection::MySQL(conn) => conn.close().await,
            DatabaseConnection::SQLite(conn) => conn.close().await,
        }
    }

    /// 执行一条语句
    pub async fn execute(
        &mut self,
        kind: QueryKind,
        sql: &str,
        params: &[DataValue],
    ) -> ProcedureResult<QueryOutput> {
        let result = match self {
            DatabaseConnection::MySQL(conn) => {
                let query = bind_params!(sqlx::query::<sqlx::MySql>(sql), params);
                let decode = |row: &MySqlRow| decode_row(row, decode_mysql_unsigned);
                match kind {
                    QueryKind::Query => query
                        .fetch_all(&mut *conn)
                        .await
                        .map(|rows| QueryOutput::Rows(rows.iter().map(decode).collect())),
                    QueryKind::QueryRow => query
                        .fetch_optional(&mut *conn)
                        .await
                        .map(|row| QueryOutput::Row(row.as_ref().map(decode))),
                    QueryKind::Exec => query.execute(&mut *conn).await.map(|done| {
                        QueryOutput::Exec(ExecResult {
                            rows_affected: done.rows_affected(),
                            last_insert_id: done.last_insert_id(),
                        })
                    }),
                }
            }
            DatabaseConnection::SQLite(conn) => {
                let query = bind_params!(sqlx::query::<sqlx::Sqlite>(sql), params);
                let decode = |row: &SqliteRow| decode_row(row, |_, _| None);
                match kind {
                    QueryKind::Query => query
                        .fetch_all(&mut *conn)
                        .await
                        .map(|rows| QueryOutput::Rows(rows.iter().map(decode).collect())),
                    QueryKind::QueryRow => query
                        .fetch_optional(&mut *conn)
                        .await
                        .map(|row| QueryOutput::Row(row.as_ref().map(decode))),
                    QueryKind::Exec => query.execute(&mut *conn).await.map(|done| {
                        QueryOutput::Exec(ExecResult {
                            rows_affected: done.rows_affected(),
                            last_insert_id: u64::try_from(done.last_insert_rowid()).unwrap_or(0),
                        })
                    }),
                }
            }
        };

        result.map_err(|e| procedure_error!(query, e.to_string(), sql))
    }
}

/// 把驱动行转换为通用行，按 整数 -> 驱动特有类型 -> 浮点 -> 文本 -> 日期时间 -> 二进制 依次尝试
fn decode_row<R>(row: &R, extra: fn(&R, usize) -> Option<DataValue>) -> Row
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> f64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> chrono::NaiveDateTime: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Vec<u8>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    let columns: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let values = (0..columns.len())
        .map(|index| decode_value(row, index, &columns[index], extra))
        .collect();

    Row::new(columns, values)
}

fn decode_value<R>(
    row: &R,
    index: usize,
    column: &str,
    extra: fn(&R, usize) -> Option<DataValue>,
) -> DataValue
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> f64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> chrono::NaiveDateTime: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Vec<u8>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(DataValue::Int).unwrap_or(DataValue::Null);
    }
    if let Some(value) = extra(row, index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(DataValue::Float).unwrap_or(DataValue::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(DataValue::String).unwrap_or(DataValue::Null);
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return value
            .map(|dt| DataValue::DateTime(dt.and_utc()))
            .unwrap_or(DataValue::Null);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map(DataValue::Bytes).unwrap_or(DataValue::Null);
    }

    warn!("列 {} 的类型无法转换，按空值处理", column);
    DataValue::Null
}

/// MySQL 无符号整数列，超出 i64 范围时按文本返回
fn decode_mysql_unsigned(row: &MySqlRow, index: usize) -> Option<DataValue> {
    let value = row.try_get::<Option<u64>, _>(index).ok()?;
    Some(match value {
        Some(v) => i64::try_from(v)
            .map(DataValue::Int)
            .unwrap_or_else(|_| DataValue::String(v.to_string())),
        None => DataValue::Null,
    })
}
