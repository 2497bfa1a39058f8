use crate::*;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

fn small_config() -> ProcessorConfig {
    ProcessorConfig {
        num_threads: 4,
        shard_count: 2,
        close_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn collector() -> (ResultCallback, mpsc::Receiver<Stream>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let cb: ResultCallback = Arc::new(move |stream| {
        let _ = tx.lock().send(stream);
    });
    (cb, rx)
}

fn processor(config: ProcessorConfig, cache: Option<ReplyCache>) -> (Processor, mpsc::Receiver<Stream>) {
    let (cb, rx) = collector();
    let p = Processor::new(config, cache, cb).expect("valid config");
    (p, rx)
}

fn call(p: &Processor, rx: &mpsc::Receiver<Stream>, path: &str, depth: u64, args: &[Value]) -> Result<Value> {
    let mut req = Stream::new();
    req.set_callback_id(99);
    wire::write_request(&mut req, path, depth, EXTERNAL_CALLER, args)?;
    assert!(p.put_stream(req));
    let mut resp = rx.recv_timeout(Duration::from_secs(5)).expect("response");
    assert_eq!(resp.callback_id(), 99);
    let result = wire::read_response(&mut resp);
    resp.release();
    result
}

fn greeter() -> Service {
    Service::new("user").reply("sayHello", |rt: Runtime, name: String| rt.ok(format!("hello {}", name)))
}

// ============================================================================
//  MOUNTING
// ============================================================================

#[test]
fn test_mount_missing_parent() {
    let (p, _rx) = processor(small_config(), None);
    let err = p.mount("$.nowhere", greeter()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
    assert!(err.message().contains("$.nowhere is not found"));
}

#[test]
fn test_mount_depth_limit() -> Result<()> {
    let config = ProcessorConfig { max_node_depth: 2, ..small_config() };
    let (p, _rx) = processor(config, None);
    p.mount("$", Service::new("a"))?;
    p.mount("$.a", Service::new("b"))?;
    let err = p.mount("$.a.b", Service::new("c")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
    assert!(err.message().contains("depth(3) is overflow. limited(2)"));
    Ok(())
}

#[test]
fn test_mount_duplicate_reports_both_origins() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    p.mount("$", greeter())?;
    let err = p.mount("$", greeter()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
    assert!(err.message().contains("duplicated service path $.user"));
    assert_eq!(err.debug().matches("src/tests.rs:").count(), 2);
    Ok(())
}

#[test]
fn test_mount_illegal_names() {
    let (p, _rx) = processor(small_config(), None);
    let err = p.mount("$", Service::new("a-b")).unwrap_err();
    assert!(err.message().contains("service name \"a-b\" is illegal"));

    let svc = Service::new("ok").reply("1x", |rt: Runtime| rt.ok(()));
    let err = p.mount("$", svc).unwrap_err();
    assert!(err.message().contains("reply name \"1x\" is illegal"));
}

#[test]
fn test_mount_rolls_back_on_failure() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    let svc = Service::new("good")
        .reply("ping", |rt: Runtime| rt.ok("pong"))
        .add_child_service(Service::new("bad name"));
    assert!(p.mount("$", svc).is_err());
    assert!(p.reply_paths().is_empty());

    p.mount("$", Service::new("good").reply("ping", |rt: Runtime| rt.ok("pong")))?;
    assert_eq!(p.reply_paths(), vec!["$.good:ping".to_string()]);
    Ok(())
}

#[test]
fn test_mount_after_start_is_kernel() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    p.start()?;
    let err = p.mount("$", greeter()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Kernel);
    p.stop()
}

#[test]
fn test_config_validation() {
    let (cb, _rx) = collector();
    let config = ProcessorConfig { max_call_depth: 0, ..small_config() };
    let err = Processor::new(config, None, cb.clone()).err().expect("rejected");
    assert_eq!(err.kind(), ErrorKind::Kernel);

    let config = ProcessorConfig { max_node_depth: 0, ..small_config() };
    assert!(Processor::new(config, None, cb).is_err());

    let config = ProcessorConfig { num_threads: 5, shard_count: 4, ..small_config() };
    assert_eq!(config.worker_count(), 8);
}

#[test]
fn test_call_strings() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    let svc = Service::new("t")
        .reply("none", |rt: Runtime| rt.ok(()))
        .reply("all", |rt: Runtime, _: bool, _: i64, _: u64, _: f64, _: String, _: Vec<u8>, _: Array, _: Map| {
            rt.ok(())
        });
    p.mount("$", svc)?;

    let none = p.reply("$.t:none").expect("mounted");
    assert_eq!(none.call_string(), "$.t:none(Context) Return");
    assert_eq!(none.kind_string(), "");

    let all = p.reply("$.t:all").expect("mounted");
    assert_eq!(all.kind_string(), "BIUFSXAM");
    assert_eq!(
        all.call_string(),
        "$.t:all(Context, Bool, Int, Uint, Float, String, Bytes, Array, Map) Return"
    );
    Ok(())
}

// ============================================================================
//  EVALUATION
// ============================================================================

#[test]
fn test_unknown_path_and_bad_stream() -> Result<()> {
    let (p, rx) = processor(small_config(), None);
    p.mount("$", greeter())?;
    p.start()?;

    let err = call(&p, &rx, "$.user:nope", 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
    assert!(err.message().contains("$.user:nope is not mounted"));

    let mut req = Stream::new();
    req.write_uint64(3);
    assert!(p.put_stream(req));
    let mut resp = rx.recv_timeout(Duration::from_secs(5)).expect("response");
    let err = wire::read_response(&mut resp).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    resp.release();
    p.stop()
}

#[test]
fn test_nested_calls_track_caller_and_depth() -> Result<()> {
    let (p, rx) = processor(small_config(), None);
    let math = Service::new("math")
        .reply("add", |rt: Runtime, a: i64, b: i64| rt.ok(a + b))
        .reply("who", |rt: Runtime| {
            let caller = rt.caller().unwrap_or_default();
            let depth = rt.depth().unwrap_or_default();
            rt.ok(format!("{}@{}", caller, depth))
        })
        .reply("twice", |rt: Runtime, x: i64| match rt.call("$.math:add", &[Value::Int64(x), Value::Int64(x)]) {
            Ok(v) => rt.ok(v),
            Err(e) => rt.error(e),
        })
        .reply("relay", |rt: Runtime| match rt.call("$.math:who", &[]) {
            Ok(v) => rt.ok(v),
            Err(e) => rt.error(e),
        });
    p.mount("$", math)?;
    p.start()?;

    assert_eq!(call(&p, &rx, "$.math:twice", 0, &[Value::Int64(21)])?, Value::Int64(42));
    assert_eq!(call(&p, &rx, "$.math:who", 2, &[])?, Value::String("#@2".into()));
    assert_eq!(call(&p, &rx, "$.math:relay", 2, &[])?, Value::String("$.math:relay@3".into()));
    p.stop()
}

#[test]
fn test_recursion_hits_call_depth() -> Result<()> {
    let config = ProcessorConfig { max_call_depth: 5, ..small_config() };
    let (p, rx) = processor(config, None);
    let svc = Service::new("r").reply("down", |rt: Runtime| match rt.call("$.r:down", &[]) {
        Ok(v) => rt.ok(v),
        Err(e) => rt.error(e),
    });
    p.mount("$", svc)?;
    p.start()?;

    let err = call(&p, &rx, "$.r:down", 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reply);
    assert_eq!(err.message(), "rpc current call depth(6) is overflow. limited(5)");
    // Every level appended its own line on the way out.
    assert_eq!(err.debug().lines().filter(|l| l.starts_with("$.r:down ") && l.contains("src/tests.rs:")).count(), 6);
    p.stop()
}

#[test]
fn test_runtime_misuse_is_ignored() -> Result<()> {
    let stash: Arc<Mutex<Option<Runtime>>> = Arc::new(Mutex::new(None));
    let keep = stash.clone();
    let reuse = stash.clone();
    let (p, rx) = processor(small_config(), None);
    let svc = Service::new("m")
        .reply("keep", move |rt: Runtime| {
            *keep.lock() = Some(rt.clone());
            rt.ok(1u64)
        })
        .reply("stale", move |_rt: Runtime| {
            let old = reuse.lock().clone().expect("stashed");
            old.ok(2u64)
        });
    p.mount("$", svc)?;
    p.start()?;

    assert_eq!(call(&p, &rx, "$.m:keep", 0, &[])?, Value::Uint64(1));

    let old = stash.lock().clone().expect("stashed");
    let _ = old.ok(5u64);
    assert_eq!(old.depth(), None);
    assert_eq!(old.call("$.m:keep", &[]).unwrap_err().message(), "Runtime is illegal in current thread");

    let err = call(&p, &rx, "$.m:stale", 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplyPanic);
    assert!(err.message().contains("returned without a result"));
    p.stop()
}

#[test]
fn test_double_write_and_unencodable_value() -> Result<()> {
    let (p, rx) = processor(small_config(), None);
    let svc = Service::new("w")
        .reply("twice", |rt: Runtime| {
            let _ = rt.ok(1i64);
            rt.error(Error::reply("second"))
        })
        .reply("deep", |rt: Runtime| {
            let mut v = Value::Array(vec![]);
            for _ in 0..100 {
                v = Value::Array(vec![v]);
            }
            rt.ok(v)
        });
    p.mount("$", svc)?;
    p.start()?;

    let err = call(&p, &rx, "$.w:twice", 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplyPanic);
    assert!(err.message().contains("written twice"));

    let err = call(&p, &rx, "$.w:deep", 0, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplyPanic);
    assert_eq!(err.message(), "value type is not supported");
    p.stop()
}

#[test]
fn test_reply_stats() -> Result<()> {
    let (p, rx) = processor(small_config(), None);
    p.mount("$", greeter())?;
    p.start()?;
    for _ in 0..3 {
        call(&p, &rx, "$.user:sayHello", 0, &[Value::from("x")])?;
    }
    let _ = call(&p, &rx, "$.user:sayHello", 0, &[Value::Int64(1)]);

    let stats = p.reply_stats("$.user:sayHello").expect("mounted");
    assert_eq!(stats.successes(), 3);
    assert_eq!(stats.failures(), 1);
    assert!(p.reply_stats("$.user:other").is_none());
    p.stop()
}

// ============================================================================
//  FAST PATHS
// ============================================================================

static FAST_HITS: AtomicUsize = AtomicUsize::new(0);

fn fc_s(rt: Runtime, stream: &mut Stream, reply: &(dyn Any + Send + Sync)) -> bool {
    let Ok(a0) = stream.read_string() else {
        return false;
    };
    if !stream.is_read_finish() {
        return false;
    }
    let Some(reply) = reply.downcast_ref::<TypedReply<(String,)>>() else {
        return false;
    };
    FAST_HITS.fetch_add(1, Ordering::SeqCst);
    let _ = reply.call(rt, (a0,));
    true
}

#[test]
fn test_fast_path_is_preferred() -> Result<()> {
    let mut cache = ReplyCache::new();
    cache.insert("S", fc_s);
    let (p, rx) = processor(small_config(), Some(cache));
    p.mount("$", greeter())?;
    assert!(p.reply("$.user:sayHello").expect("mounted").has_fast_path());
    p.start()?;

    let before = FAST_HITS.load(Ordering::SeqCst);
    assert_eq!(call(&p, &rx, "$.user:sayHello", 0, &[Value::from("fast")])?, Value::from("hello fast"));
    assert_eq!(FAST_HITS.load(Ordering::SeqCst), before + 1);

    let err = call(&p, &rx, "$.user:sayHello", 0, &[Value::Int64(3)]).unwrap_err();
    assert!(err.message().starts_with("rpc reply arguments not match"));
    p.stop()
}

#[test]
fn test_build_cache_is_sorted_and_deterministic() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    let svc = Service::new("c")
        .reply("is", |rt: Runtime, _: i64, _: String| rt.ok(()))
        .reply("s", |rt: Runtime, _: String| rt.ok(()))
        .reply("s2", |rt: Runtime, _: String| rt.ok(()))
        .reply("none", |rt: Runtime| rt.ok(()))
        .reply("b", |rt: Runtime, _: bool| rt.ok(()));
    p.mount("$", svc)?;

    let path = std::env::temp_dir().join(format!("rpcproc-cache-{}.rs", std::process::id()));
    p.build_cache("demo", &path)?;
    let first = std::fs::read_to_string(&path).expect("written");
    p.build_cache("demo", &path)?;
    let second = std::fs::read_to_string(&path).expect("written");
    let _ = std::fs::remove_file(&path);
    assert_eq!(first, second);

    let order: Vec<usize> = ["pub fn fc(", "pub fn fcB(", "pub fn fcS(", "pub fn fcIS("]
        .iter()
        .map(|f| first.find(f).expect("function emitted"))
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(first.matches("pub fn fcS(").count(), 1);
    assert!(first.contains("downcast_ref::<TypedReply<(i64,String,)>>()"));
    assert!(first.contains("cache.insert(\"IS\", fcIS);"));
    assert!(first.contains("Fast-path decoders for `demo`"));
    Ok(())
}

// ============================================================================
//  LIFECYCLE
// ============================================================================

#[test]
fn test_lifecycle_errors() -> Result<()> {
    let (p, _rx) = processor(small_config(), None);
    assert_eq!(p.stop().unwrap_err().kind(), ErrorKind::Kernel);
    assert!(!p.put_stream(Stream::new()));

    p.start()?;
    assert!(p.is_running());
    assert_eq!(p.start().unwrap_err().kind(), ErrorKind::Kernel);
    p.stop()?;
    assert!(!p.put_stream(Stream::new()));
    Ok(())
}
