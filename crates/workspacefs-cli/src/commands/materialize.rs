//! Materialize command implementation.

use crate::cli::MaterializeArgs;
use crate::error::add_image_context;
use crate::output::OutputFormatter;
use crate::progress::CliProgress;
use anyhow::Context;
use anyhow::Result;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::env;
use std::sync::Arc;
use tracing::debug;
use workspacefs_core::CancelToken;
use workspacefs_core::MaterializeConfig;
use workspacefs_core::NoopProgress;
use workspacefs_core::Strategy;
use workspacefs_core::materialize_image_with_progress;

pub fn execute(args: &MaterializeArgs, formatter: &dyn OutputFormatter, quiet: bool) -> Result<()> {
    let output_dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("failed to get current directory")?,
    };

    let config = build_config(args);
    debug!(?config, "resolved configuration");

    let cancel = args
        .timeout
        .map_or_else(CancelToken::new, CancelToken::with_timeout);
    cancel_on_signals(&cancel)?;

    // Use a spinner only on a TTY and when nothing else owns stdout
    let report = if !quiet && CliProgress::should_show() {
        let mut progress = CliProgress::new("Materializing");
        add_image_context(
            materialize_image_with_progress(
                &args.image,
                &output_dir,
                &config,
                &cancel,
                &mut progress,
            ),
            &args.image,
        )?
    } else {
        let mut noop = NoopProgress;
        add_image_context(
            materialize_image_with_progress(&args.image, &output_dir, &config, &cancel, &mut noop),
            &args.image,
        )?
    };

    formatter.format_materialize_result(&output_dir, &report)?;

    Ok(())
}

/// Routes Ctrl-C and other termination signals into `cancel` so staging is
/// cleaned up. A second signal exits immediately.
fn cancel_on_signals(cancel: &CancelToken) -> Result<()> {
    let cancelled = cancel.shared_flag();
    for &signal in TERM_SIGNALS {
        flag::register_conditional_shutdown(signal, 1, Arc::clone(&cancelled))
            .and_then(|_| flag::register(signal, Arc::clone(&cancelled)))
            .context("failed to install signal handler")?;
    }
    Ok(())
}

fn build_config(args: &MaterializeArgs) -> MaterializeConfig {
    let strategy = if args.mount {
        Strategy::Mount
    } else {
        Strategy::Extract
    };

    let mut config = MaterializeConfig::default().with_strategy(strategy);
    if let Some(debugfs) = &args.debugfs {
        config.debugfs_path.clone_from(debugfs);
    }
    for name in &args.reserved {
        if !config.reserved_dirs.contains(name) {
            config.reserved_dirs.push(name.clone());
        }
    }
    config
}
