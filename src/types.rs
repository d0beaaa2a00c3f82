//! 数据库类型定义
//!
//! 定义支持的数据库类型、语句参数、结果行与执行结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ProcedureError, ProcedureResult};
use crate::procedure_error;

/// 支持的数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    /// MySQL 数据库
    MySQL,
    /// SQLite 数据库
    SQLite,
}

impl DatabaseType {
    /// 获取数据库类型的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::MySQL => "mysql",
            DatabaseType::SQLite => "sqlite",
        }
    }

    /// 从连接串前缀识别数据库类型
    pub fn from_dsn(dsn: &str) -> ProcedureResult<Self> {
        let lower = dsn.trim_start().to_ascii_lowercase();
        if lower.starts_with("mysql://") {
            Ok(DatabaseType::MySQL)
        } else if lower.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else {
            Err(procedure_error!(unsupported_db, dsn))
        }
    }
}

/// 语句类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// 查询多行
    Query,
    /// 查询单行
    QueryRow,
    /// 执行（增删改、DDL）
    Exec,
}

/// 通用数据值，用作语句参数与结果列值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// 空值
    Null,
    /// 布尔值
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 字符串
    String(String),
    /// 二进制
    Bytes(Vec<u8>),
    /// 日期时间
    DateTime(DateTime<Utc>),
    /// JSON 值，绑定时序列化为字符串
    Json(serde_json::Value),
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int(i) => Some(*i),
            DataValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Float(f) => Some(*f),
            DataValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            DataValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// 转换为 JSON 值
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            DataValue::Null => Value::Null,
            DataValue::Bool(b) => Value::Bool(*b),
            DataValue::Int(i) => Value::from(*i),
            DataValue::Float(f) => Value::from(*f),
            DataValue::String(s) => Value::String(s.clone()),
            DataValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
            }
            DataValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            DataValue::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Int(value)
    }
}

impl From<u32> for DataValue {
    fn from(value: u32) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::String(value)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(value: Vec<u8>) -> Self {
        DataValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for DataValue {
    fn from(value: DateTime<Utc>) -> Self {
        DataValue::DateTime(value)
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(value: serde_json::Value) -> Self {
        DataValue::Json(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DataValue::Null)
    }
}

/// 构造语句参数列表
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::types::DataValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::types::DataValue::from($value)),+]
    };
}

/// 结果行，保持列顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<DataValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<DataValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// 按列名取值
    pub fn get(&self, column: &str) -> Option<&DataValue> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    /// 按列序号取值
    pub fn get_index(&self, index: usize) -> Option<&DataValue> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 转换为列名到值的映射
    pub fn into_map(self) -> HashMap<String, DataValue> {
        self.columns.into_iter().zip(self.values).collect()
    }

    /// 转换为 JSON 对象
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

/// 执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// 影响行数
    pub rows_affected: u64,
    /// 最后插入的自增ID
    pub last_insert_id: u64,
}

/// 工作线程返回的原始结果
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Exec(ExecResult),
}

impl QueryOutput {
    pub fn into_rows(self) -> ProcedureResult<Vec<Row>> {
        match self {
            QueryOutput::Rows(rows) => Ok(rows),
            other => Err(mismatch("Query", &other)),
        }
    }

    pub fn into_row(self) -> ProcedureResult<Option<Row>> {
        match self {
            QueryOutput::Row(row) => Ok(row),
            other => Err(mismatch("QueryRow", &other)),
        }
    }

    pub fn into_exec(self) -> ProcedureResult<ExecResult> {
        match self {
            QueryOutput::Exec(result) => Ok(result),
            other => Err(mismatch("Exec", &other)),
        }
    }
}

fn mismatch(expected: &str, actual: &QueryOutput) -> ProcedureError {
    ProcedureError::TaskExecutionError(format!("结果类型不匹配: 期望 {}，实际 {:?}", expected, actual))
}
