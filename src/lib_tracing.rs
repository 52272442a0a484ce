use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing_flame::{FlameLayer, FlushGuard};
use tracing_subscriber::prelude::*;

use crate::error::RouterError;

#[derive(Clone, Debug, PartialEq)]
pub struct TracerOptions {
    /// Receives every event at every level.
    pub log_file: PathBuf,
    /// Folded stacks for flame graphs, when set.
    pub flame_file: Option<PathBuf>,
}

impl Default for TracerOptions {
    fn default() -> Self {
        TracerOptions {
            log_file: PathBuf::from("debug.log"),
            flame_file: None,
        }
    }
}

/// Routes the crate's tracing output to stdout (INFO and up) and to a debug
/// log file, for as long as the tracer is alive on the current thread.
pub struct LibTracer {
    _default: DefaultGuard,
    flame: Option<FlushGuard<BufWriter<File>>>,
}

impl LibTracer {
    pub fn new(options: TracerOptions) -> Result<Self, RouterError> {
        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        // A layer that logs events to a file.
        let file = File::create(&options.log_file)
            .map_err(|e| RouterError::TraceOutput(format!("{}: {e}", options.log_file.display())))?;
        let debug_log = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Arc::new(file));

        let (flame_layer, flame) = match &options.flame_file {
            Some(path) => {
                let (layer, guard) = FlameLayer::with_file(path)
                    .map_err(|e| RouterError::TraceOutput(format!("{}: {e}", path.display())))?;
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(LevelFilter::INFO)
                    .and_then(debug_log),
            )
            .with(flame_layer);
        let default = tracing::subscriber::set_default(subscriber);

        Ok(LibTracer {
            _default: default,
            flame,
        })
    }

    /// Writes out buffered flame graph samples.
    pub fn flush(&self) -> Result<(), RouterError> {
        if let Some(flame) = &self.flame {
            flame
                .flush()
                .map_err(|e| RouterError::TraceOutput(format!("flame graph: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracer_writes_debug_events_to_the_log_file() {
        let dir = std::env::temp_dir().join(format!("tileroute-tracer-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let options = TracerOptions {
            log_file: dir.join("debug.log"),
            flame_file: Some(dir.join("tracing.folded")),
        };
        {
            let tracer = LibTracer::new(options.clone()).unwrap();
            tracing::debug!(edges = 3, "collected edges");
            tracer.flush().unwrap();
        }
        let log = std::fs::read_to_string(&options.log_file).unwrap();
        assert!(log.contains("collected edges"));
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let options = TracerOptions {
            log_file: PathBuf::from("/nonexistent-dir/for/sure/debug.log"),
            flame_file: None,
        };
        assert!(matches!(LibTracer::new(options), Err(RouterError::TraceOutput(_))));
    }
}
