use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use stonemq_consumer::group_consume::{ConsumerModule, MemoryCluster, PrefixRegistry};
use stonemq_consumer::handler::middleware::{ignore_errors, mark, recover};
use stonemq_consumer::handler::{chain, handler_fn, HandlerFunc, Middleware};
use stonemq_consumer::{setup_local_tracing, ConsumerConfig, Runner};
use tokio_util::sync::CancellationToken;

const BROKER: &str = "memory:9092";
const TOPIC: &str = "orders";

#[fixture]
#[once]
fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

fn cluster(messages: usize) -> MemoryCluster {
    let cluster = MemoryCluster::new([BROKER]);
    cluster.create_topic(TOPIC, 2);
    for i in 0..messages {
        cluster
            .produce(TOPIC, (i % 2) as i32, format!("k{i}"), format!("v{i}"))
            .unwrap();
    }
    cluster
}

fn module(cluster: &MemoryCluster, group: &str, handler: HandlerFunc) -> ConsumerModule {
    let mut config = ConsumerConfig::new(vec![BROKER.into()], vec![TOPIC.into()], group);
    config.retry_wait_seconds = 0;
    ConsumerModule::new(
        config,
        Arc::new(cluster.connector()),
        Arc::new(PrefixRegistry::new()),
        handler,
    )
}

fn counting_handler() -> (HandlerFunc, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let handler = handler_fn(move |_, mark| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            mark("");
            Ok(())
        }
    });
    (handler, count)
}

/// Fires once `count` reaches `target`.
fn stop_after(count: Arc<AtomicUsize>, target: usize) -> CancellationToken {
    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        while count.load(Ordering::SeqCst) < target {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trigger.cancel();
    });
    stop
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_shuts_down_every_consumer(_setup: ()) {
    let cluster = cluster(6);
    let (billing, billing_count) = counting_handler();
    let (audit, audit_count) = counting_handler();
    let total = Arc::new(AtomicUsize::new(0));
    let stop = CancellationToken::new();
    {
        let (stop, total) = (stop.clone(), total.clone());
        tokio::spawn(async move {
            loop {
                let seen =
                    billing_count.load(Ordering::SeqCst) + audit_count.load(Ordering::SeqCst);
                total.store(seen, Ordering::SeqCst);
                if seen == 12 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stop.cancel();
        });
    }

    let code = Runner::new()
        .with_module(module(&cluster, "billing", billing))
        .with_module(module(&cluster, "audit", audit))
        .run_until(stop.cancelled_owned())
        .await;

    assert_eq!(code, 0);
    assert_eq!(total.load(Ordering::SeqCst), 12);
    let closed: Vec<String> = cluster
        .closed_coordinators()
        .into_iter()
        .map(|(group, _)| group)
        .collect();
    // reverse declaration order
    assert_eq!(closed, vec!["audit".to_string(), "billing".to_string()]);
    for partition in 0..2 {
        assert_eq!(
            cluster
                .committed_offset("billing", TOPIC, partition)
                .map(|c| c.offset),
            Some(3)
        );
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_consumer_stops_the_others(_setup: ()) {
    let cluster = cluster(2);
    let (healthy, _) = counting_handler();
    let failing = handler_fn(|_, _| async { Err("downstream rejected the record".into()) });

    let started = Instant::now();
    let code = Runner::new()
        .with_module(module(&cluster, "billing", healthy))
        .with_module(module(&cluster, "audit", failing))
        .run_until(std::future::pending())
        .await;

    assert_eq!(code, 1);
    assert_eq!(cluster.closed_coordinators().len(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[rstest]
#[tokio::test]
async fn init_failure_never_runs_handlers(_setup: ()) {
    let cluster = cluster(2);
    let (first, first_count) = counting_handler();
    let (second, second_count) = counting_handler();
    let unreachable = {
        let mut config =
            ConsumerConfig::new(vec!["nowhere:9092".into()], vec![TOPIC.into()], "audit");
        config.retry_wait_seconds = 0;
        ConsumerModule::new(
            config,
            Arc::new(cluster.connector()),
            Arc::new(PrefixRegistry::new()),
            second,
        )
    };

    let code = Runner::new()
        .with_module(module(&cluster, "billing", first))
        .with_module(unreachable)
        .run_until(std::future::pending())
        .await;

    assert_eq!(code, 1);
    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 0);
    // the initialized consumer is still released
    let closed: Vec<String> = cluster
        .closed_coordinators()
        .into_iter()
        .map(|(group, _)| group)
        .collect();
    assert_eq!(closed, vec!["billing".to_string()]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recovered_panics_are_marked_and_skipped(_setup: ()) {
    let cluster = cluster(4);
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let handler = handler_fn(move |message, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if message.offset == 0 {
                panic!("bad record at offset 0");
            }
            Ok(())
        }
    });
    let middlewares: Vec<Middleware> = vec![
        Arc::new(ignore_errors) as Middleware,
        Arc::new(mark) as Middleware,
        Arc::new(recover) as Middleware,
    ];
    let stop = stop_after(handled.clone(), 4);

    let code = Runner::new()
        .with_module(module(&cluster, "billing", chain(handler, middlewares)))
        .run_until(stop.cancelled_owned())
        .await;

    assert_eq!(code, 0);
    assert_eq!(handled.load(Ordering::SeqCst), 4);
    for partition in 0..2 {
        assert_eq!(
            cluster
                .committed_offset("billing", TOPIC, partition)
                .map(|c| c.offset),
            Some(2)
        );
    }
}
