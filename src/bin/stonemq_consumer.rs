use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use stonemq_consumer::group_consume::{ConsumerModule, MemoryCluster, PrefixRegistry};
use stonemq_consumer::handler::middleware::{
    common_defaults_with_retry, duration_metric, log, recover, trace,
};
use stonemq_consumer::handler::{chain, handler_fn, Middleware};
use stonemq_consumer::service::setup_tracing;
use stonemq_consumer::{AppConfig, AppResult, Runner};
use tokio::runtime;
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let app_config = AppConfig::set_up_config(config_path)?;
    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", app_config);
        return Ok(());
    }

    // the otlp exporters need a runtime context
    let _otel_guard = rt.block_on(async { setup_tracing() })?;

    let cluster = MemoryCluster::new(app_config.consumer.brokers.clone());
    for topic in &app_config.consumer.topics {
        cluster.create_topic(topic, app_config.cluster.partitions);
        for i in 0..app_config.cluster.seed_messages {
            let partition = (i % app_config.cluster.partitions.max(1) as usize) as i32;
            cluster.produce(topic, partition, format!("key-{i}"), format!("value-{i}"))?;
        }
    }

    let handler = handler_fn(|message, mark| async move {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            value = %String::from_utf8_lossy(&message.value),
            "consumed"
        );
        mark("");
        Ok(())
    });
    let middlewares: Vec<Middleware> = vec![
        Arc::new(recover) as Middleware,
        Arc::new(trace) as Middleware,
        Arc::new(log) as Middleware,
        Arc::new(duration_metric) as Middleware,
        common_defaults_with_retry(3, Duration::from_secs(1)),
    ];

    let module = ConsumerModule::new(
        app_config.consumer,
        Arc::new(cluster.connector()),
        Arc::new(PrefixRegistry::new()),
        chain(handler, middlewares),
    );

    let code = rt.block_on(Runner::new().with_module(module).run());
    drop(_otel_guard);
    std::process::exit(code);
}
