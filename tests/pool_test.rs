//! 分片连接池集成测试
//! 使用 SQLite：内存库每个连接相互独立，可用来观察分片路由；
//! 文件库被所有工作线程共享，可用来验证跨分片可见性

use rat_procedure::{
    ConnectionPool, DataValue, DatabaseType, PoolConfig, Procedure, ProcedureError, Service,
    params,
};
use std::sync::mpsc;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct NoopService;

impl Service for NoopService {
    fn on_init(&mut self, _procedure: &Procedure) {}
    fn on_release(&mut self) {}
}

fn memory_pool(worker_count: usize) -> ConnectionPool {
    ConnectionPool::open("sqlite::memory:", worker_count).expect("打开内存连接池失败")
}

#[test]
fn test_shard_routing_wraps_by_worker_count() {
    let pool = memory_pool(3);
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(pool.db_type(), DatabaseType::SQLite);
    assert_eq!(pool.worker_index(3), 0);
    assert_eq!(pool.worker_index(7), 1);

    pool.exec(0, "CREATE TABLE routed (id INTEGER PRIMARY KEY, name TEXT)", params![])
        .unwrap();

    // 3 % 3 == 0，与分片 0 共用同一个连接
    let result = pool
        .exec(3, "INSERT INTO routed (name) VALUES (?)", params!["alice"])
        .unwrap();
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.last_insert_id, 1);

    // 分片 1 是另一个内存库
    let err = pool
        .exec(1, "INSERT INTO routed (name) VALUES (?)", params!["bob"])
        .unwrap_err();
    match err {
        ProcedureError::QueryError { message, sql } => {
            assert!(message.contains("no such table"), "意外的错误信息: {}", message);
            assert!(sql.contains("routed"));
        }
        other => panic!("期望语句错误，实际: {:?}", other),
    }

    let rows = pool.query(0, "SELECT id, name FROM routed", params![]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").and_then(DataValue::as_str), Some("alice"));
}

#[test]
fn test_failed_statement_keeps_worker_usable() {
    let pool = memory_pool(1);

    let err = pool.exec(0, "INSERT INTO missing VALUES (1)", params![]).unwrap_err();
    assert!(matches!(err, ProcedureError::QueryError { .. }));

    let err = pool.exec(0, "THIS IS NOT SQL", params![]).unwrap_err();
    assert!(matches!(err, ProcedureError::QueryError { .. }));

    pool.exec(0, "CREATE TABLE t (v INTEGER)", params![]).unwrap();
    pool.exec(0, "INSERT INTO t (v) VALUES (?)", params![42]).unwrap();
    let row = pool
        .query_row(0, "SELECT v FROM t", params![])
        .unwrap()
        .expect("应有一行");
    assert_eq!(row.get("v"), Some(&DataValue::Int(42)));
}

#[test]
fn test_query_row_without_result_is_none() {
    let pool = memory_pool(2);
    pool.exec(1, "CREATE TABLE empty (id INTEGER)", params![]).unwrap();
    let row = pool
        .query_row(1, "SELECT id FROM empty WHERE id = ?", params![1])
        .unwrap();
    assert!(row.is_none());
}

#[test]
fn test_value_decoding() {
    let pool = memory_pool(1);
    let row = pool
        .query_row(
            0,
            "SELECT 7 AS i, 1.5 AS f, 'text' AS s, NULL AS n, x'0102' AS b",
            params![],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.columns(), ["i", "f", "s", "n", "b"]);
    assert_eq!(row.get("i"), Some(&DataValue::Int(7)));
    assert_eq!(row.get("f"), Some(&DataValue::Float(1.5)));
    assert_eq!(row.get("s"), Some(&DataValue::String("text".to_string())));
    assert_eq!(row.get("n"), Some(&DataValue::Null));
    assert_eq!(row.get("b"), Some(&DataValue::Bytes(vec![1, 2])));
}

#[test]
fn test_async_exec_preserves_shard_order() {
    let procedure = Procedure::new(NoopService);
    procedure.start().unwrap();
    let pool = memory_pool(3);
    pool.exec(2, "CREATE TABLE seq (id INTEGER PRIMARY KEY, v INTEGER)", params![])
        .unwrap();

    let (tx, rx) = mpsc::channel();
    for i in 0..50i64 {
        let tx = tx.clone();
        pool.async_exec(
            &procedure,
            move |result| {
                let _ = tx.send(result.map(|done| done.last_insert_id));
            },
            5,
            "INSERT INTO seq (v) VALUES (?)",
            params![i],
        )
        .unwrap();
    }

    let ids: Vec<u64> = (0..50)
        .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap())
        .collect();
    assert_eq!(ids, (1..=50).collect::<Vec<u64>>());

    let values: Vec<i64> = pool
        .query(2, "SELECT v FROM seq ORDER BY id", params![])
        .unwrap()
        .iter()
        .map(|row| row.get("v").and_then(DataValue::as_i64).unwrap())
        .collect();
    assert_eq!(values, (0..50).collect::<Vec<i64>>());

    pool.close();
    procedure.shutdown().unwrap();
}

#[test]
fn test_async_callbacks_run_on_main_thread() {
    let procedure = Procedure::new(NoopService);
    procedure.start().unwrap();
    let pool = memory_pool(2);

    let (tx, rx) = mpsc::channel();
    let inner = procedure.clone();
    pool.async_query_row(
        &procedure,
        move |result| {
            let value = result
                .ok()
                .flatten()
                .and_then(|row| row.get_index(0).and_then(DataValue::as_i64));
            let _ = tx.send((inner.is_main_thread(), value));
        },
        0,
        "SELECT ? + 1",
        params![41],
    )
    .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (true, Some(42)));

    // 失败的语句通过回调参数返回错误
    let (tx, rx) = mpsc::channel();
    let inner = procedure.clone();
    pool.async_query(
        &procedure,
        move |result| {
            let _ = tx.send((inner.is_main_thread(), result.is_err()));
        },
        1,
        "SELECT * FROM nowhere",
        params![],
    )
    .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (true, true));

    pool.close();
    procedure.shutdown().unwrap();
}

#[test]
fn test_detached_exec_is_applied_in_order() {
    let pool = memory_pool(1);
    pool.exec(0, "CREATE TABLE log (msg TEXT)", params![]).unwrap();
    pool.async_exec_detached(0, "INSERT INTO log (msg) VALUES (?)", params!["first"])
        .unwrap();
    pool.async_exec_detached(0, "INSERT INTO nowhere VALUES (1)", params![])
        .unwrap();

    let row = pool
        .query_row(0, "SELECT COUNT(*) AS c FROM log", params![])
        .unwrap()
        .unwrap();
    assert_eq!(row.get("c"), Some(&DataValue::Int(1)));
}

#[test]
fn test_calls_after_close_fail() {
    let procedure = Procedure::new(NoopService);
    procedure.start().unwrap();
    let pool = memory_pool(2);

    pool.close();
    assert!(pool.is_closed());
    // 重复关闭是无操作
    pool.close();

    let err = pool.exec(0, "SELECT 1", params![]).unwrap_err();
    assert!(err.is_pool_closed());
    let err = pool
        .async_exec(&procedure, |_| {}, 0, "SELECT 1", params![])
        .unwrap_err();
    assert!(matches!(err, ProcedureError::PoolClosed));
    assert!(pool.async_exec_detached(1, "SELECT 1", params![]).is_err());

    procedure.shutdown().unwrap();
}

#[test]
fn test_shared_file_database_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let config = PoolConfig::builder()
        .dsn(format!("sqlite://{}?mode=rwc", path.display()))
        .worker_count(3)
        .keepalive_interval_secs(1)
        .build()
        .unwrap();
    let pool = ConnectionPool::with_config(config).unwrap();

    pool.exec(0, "CREATE TABLE players (id INTEGER PRIMARY KEY, name TEXT)", params![])
        .unwrap();
    pool.exec(1, "INSERT INTO players (name) VALUES (?)", params!["carol"])
        .unwrap();

    // 等待保活 ping 至少触发一次，连接仍可用
    std::thread::sleep(Duration::from_millis(1200));

    let rows = pool.query(2, "SELECT name FROM players", params![]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").and_then(DataValue::as_str), Some("carol"));
    drop(pool);
    assert!(path.exists());
}

#[test]
fn test_open_rejects_bad_input() {
    let err = ConnectionPool::open("postgres://localhost/db", 2).unwrap_err();
    assert!(matches!(err, ProcedureError::UnsupportedDatabase { .. }));

    let err = ConnectionPool::open("sqlite::memory:", 0).unwrap_err();
    assert!(matches!(err, ProcedureError::ConfigError { .. }));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no_such_dir").join("db.sqlite");
    let err = ConnectionPool::open(format!("sqlite://{}", missing.display()), 2).unwrap_err();
    assert!(matches!(err, ProcedureError::ConnectionError { .. }));
}

#[test]
fn test_close_during_traffic_answers_every_request() {
    let procedure = Procedure::new(NoopService);
    procedure.start().unwrap();
    let pool = std::sync::Arc::new(memory_pool(2));
    for shard in 0..2 {
        pool.exec(shard, "CREATE TABLE traffic (v INTEGER)", params![]).unwrap();
    }

    // 另一个线程持续发起同步调用
    let sync_pool = std::sync::Arc::clone(&pool);
    let sync_caller = std::thread::spawn(move || {
        let mut answered = 0;
        for i in 0..200i64 {
            match sync_pool.exec(i as usize, "INSERT INTO traffic (v) VALUES (?)", params![i]) {
                Ok(done) => assert_eq!(done.rows_affected, 1),
                Err(e) => assert!(e.is_pool_closed(), "意外的错误: {:?}", e),
            }
            answered += 1;
        }
        answered
    });

    let closer_pool = std::sync::Arc::clone(&pool);
    let closer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        closer_pool.close();
    });

    let (tx, rx) = mpsc::channel();
    let mut accepted = 0;
    for i in 0..400i64 {
        let tx = tx.clone();
        match pool.async_exec(
            &procedure,
            move |result| {
                let _ = tx.send(result);
            },
            i as usize,
            "INSERT INTO traffic (v) VALUES (?)",
            params![i],
        ) {
            Ok(()) => accepted += 1,
            Err(e) => assert!(e.is_pool_closed()),
        }
    }
    drop(tx);

    // 已受理的异步请求都必须得到回调：成功或连接池关闭
    for _ in 0..accepted {
        match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            Ok(done) => assert_eq!(done.rows_affected, 1),
            Err(e) => assert!(e.is_pool_closed(), "意外的错误: {:?}", e),
        }
    }

    closer.join().unwrap();
    assert_eq!(sync_caller.join().unwrap(), 200);
    assert!(pool.is_closed());
    procedure.shutdown().unwrap();
}
