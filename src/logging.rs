//! Structured logging for the MARTIN trading engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE -> FATAL)
//! 2. Domain-specific categories for filtering
//! 3. Run-scoped log files for audit replay
//! 4. Redaction of secret-shaped fields before anything hits disk

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

/// Log categories. One per system concern named in the external-interfaces section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market, // candle/price ingestion
    Signal, // TA signal detection and quality scoring
    Cap,    // price-cap validation
    Exec,   // order placement and lifecycle
    Fill,   // fill processing and settlement
    Stats,  // streak bookkeeping and policy mode
    System, // startup, shutdown, recovery, profiling
    Audit,  // decision/chat audit trail
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Signal => "signal",
            Domain::Cap => "cap",
            Domain::Exec => "exec",
            Domain::Fill => "fill",
            Domain::Stats => "stats",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let events_path = run_dir.join("events.jsonl");
        let trace_path = run_dir.join("trace.jsonl");
        let manifest_path = run_dir.join("manifest.json");

        let _ = std::fs::write(
            manifest_path,
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        let events = File::create(events_path).unwrap_or_else(|err| {
            eprintln!("[log] failed to create events log: {}", err);
            File::create("/tmp/martin-events.jsonl").expect("events fallback")
        });
        let trace = File::create(trace_path).unwrap_or_else(|err| {
            eprintln!("[log] failed to create trace log: {}", err);
            File::create("/tmp/martin-trace.jsonl").expect("trace fallback")
        });

        RunContext {
            run_id,
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "api_secret", "signature", "private_key"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["trade_id", "window_id", "asset", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
    }
}

pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// Domain-specific helpers, one per the hot paths in the lifecycle.

pub fn log_signal(window_id: i64, direction: &str, quality: f64, confirm_ts: i64) {
    log(
        Level::Info,
        Domain::Signal,
        "signal_detected",
        obj(&[
            ("window_id", json!(window_id)),
            ("direction", v_str(direction)),
            ("quality", v_num(quality)),
            ("confirm_ts", json!(confirm_ts)),
        ]),
    );
}

pub fn log_cap_check(trade_id: i64, status: &str, consecutive_ticks: i64, price: f64) {
    log(
        Level::Debug,
        Domain::Cap,
        "cap_tick",
        obj(&[
            ("trade_id", json!(trade_id)),
            ("status", v_str(status)),
            ("consecutive_ticks", json!(consecutive_ticks)),
            ("price", v_num(price)),
        ]),
    );
}

pub fn log_order_submit(trade_id: i64, token_id: &str, price: f64, size: f64) {
    log(
        Level::Info,
        Domain::Exec,
        "order_submit",
        obj(&[
            ("trade_id", json!(trade_id)),
            ("token_id", v_str(token_id)),
            ("price", v_num(price)),
            ("size", v_num(size)),
        ]),
    );
}

pub fn log_fill(trade_id: i64, order_id: &str, fill_price: f64) {
    log(
        Level::Info,
        Domain::Fill,
        "fill",
        obj(&[
            ("trade_id", json!(trade_id)),
            ("order_id", v_str(order_id)),
            ("fill_price", v_num(fill_price)),
        ]),
    );
}

pub fn log_settlement(trade_id: i64, is_win: bool, pnl: f64, streak: i64) {
    log(
        Level::Info,
        Domain::Stats,
        "settlement",
        obj(&[
            ("trade_id", json!(trade_id)),
            ("is_win", json!(is_win)),
            ("pnl", v_num(pnl)),
            ("trade_level_streak", json!(streak)),
        ]),
    );
}

pub fn log_audit(trade_id: i64, decision: &str, cancel_reason: Option<&str>) {
    log(
        Level::Info,
        Domain::Audit,
        "decision",
        obj(&[
            ("trade_id", json!(trade_id)),
            ("decision", v_str(decision)),
            ("cancel_reason", cancel_reason.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            context: None,
            started: Instant::now(),
            enabled: Self::should_sample(),
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::System, "profile", fields);
    }
}

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

struct LogAggregator {
    trades_settled: u64,
    orders_placed: u64,
    cap_fails: u64,
    errors: u64,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            trades_settled: 0,
            orders_placed: 0,
            cap_fails: 0,
            errors: 0,
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "settlement" => self.trades_settled += 1,
            "order_placed" => self.orders_placed += 1,
            "cap_fail" => self.cap_fails += 1,
            "error" => self.errors += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<(u64, u64, u64, u64)> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = (self.trades_settled, self.orders_placed, self.cap_fails, self.errors);
            self.trades_settled = 0;
            self.orders_placed = 0;
            self.cap_fails = 0;
            self.errors = 0;
            self.last_flush = Instant::now();
            Some(result)
        } else {
            None
        }
    }
}

pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some((settled, orders, cap_fails, errors)) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("trades_settled", json!(settled)),
                    ("orders_placed", json!(orders)),
                    ("cap_fails", json!(cap_fails)),
                    ("errors", json!(errors)),
                ]),
            );
        }
    }
}

pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}
