//! Logging setup: JSON (Bunyan) when stdout is not a TTY, human-readable text
//! otherwise, following the same auto-detection convention used elsewhere in this service.

use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

pub fn initialize_logging(log_format: LogFormat) {
    let env_filter = EnvFilter::from_default_env();

    match log_format.resolve() {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new(
                    "netronome".to_string(),
                    StdoutMakeWriter,
                ))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Auto => unreachable!("resolve() never returns Auto"),
    }
}

struct StdoutMakeWriter;

impl<'a> MakeWriter<'a> for StdoutMakeWriter {
    type Writer = std::io::Stdout;

    fn make_writer(&'a self) -> Self::Writer {
        std::io::stdout()
    }
}
