#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use streamhost_core::config::HostConfig;
use streamhost_core::filter::{StreamFilter, SuffixFilter};
use streamhost_core::group_host::ConsumerGroupHost;
use streamhost_core::log::{EprintlnLog, LogSink};

use streamhost_host::demo_processor::DemoProcessorProvider;
use streamhost_host::gelf::GelfLogSink;
use streamhost_host::kafka::KafkaBrokerClient;

/// Component E. Installs the stop signal, builds (D), blocks until it
/// returns, and maps the outcome onto §6's exit codes.
fn main() {
    let code = match std::panic::catch_unwind(run) {
        Ok(code) => code,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            eprintln!("[FATAL] unhandled main-thread failure: {message}");
            3
        }
    };
    std::process::exit(code);
}

fn run() -> i32 {
    let config = HostConfig::from_env();
    let suffix = env::var("STREAMHOST_STREAM_SUFFIX").unwrap_or_else(|_| "-T".to_string());
    let processor_env = HostConfig::processor_env();

    let log: Arc<dyn LogSink> = match env::var("STREAMHOST_GELF_ADDR") {
        Ok(addr) => match GelfLogSink::new(&addr) {
            Ok(sink) => {
                eprintln!("[INFO] GELF logging enabled ({addr})");
                Arc::new(sink)
            }
            Err(e) => {
                eprintln!("[WARN] failed to start GELF logging ({addr}): {e}, falling back to stderr");
                Arc::new(EprintlnLog)
            }
        },
        Err(_) => Arc::new(EprintlnLog),
    };

    log.info(&format!(
        "starting streamhost-host: bootstrap={} group={} suffix={suffix} processor_keys={}",
        config.bootstrap_endpoints,
        config.consumer_group_id,
        processor_env.len()
    ));

    let broker = match KafkaBrokerClient::new(&config.bootstrap_endpoints, &config.consumer_group_id) {
        Ok(broker) => broker,
        Err(e) => {
            log.fatal(&format!("failed to build Kafka consumer: {e}"));
            return 1;
        }
    };

    let provider = DemoProcessorProvider::new(Arc::clone(&log));
    let filter: Box<dyn StreamFilter> = Box::new(SuffixFilter::new(suffix));
    let stop = Arc::new(AtomicBool::new(false));

    let host = ConsumerGroupHost::new(broker, provider, filter, config, Arc::clone(&log), Arc::clone(&stop));
    let cancel = host.cancel_token();

    // A first signal requests graceful drain (complete_adding + join on
    // every processor host); a second is the hard-cancel fallback from §5
    // for when a stuck processor never drains.
    {
        let stop = Arc::clone(&stop);
        let cancel = cancel.clone();
        let log = Arc::clone(&log);
        if let Err(e) = ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::SeqCst) {
                log.warn("second shutdown signal received, cancelling in-flight work");
                cancel.cancel();
            } else {
                log.info("shutdown signal received, draining");
            }
        }) {
            log.error(&format!("failed to install signal handler: {e}"));
        }
    }

    match host.run() {
        Ok(()) => {
            log.info("stopped cleanly");
            0
        }
        Err(e) => {
            log.fatal(&format!("poll loop terminated: {e}"));
            1
        }
    }
}
