//! Logging/error-reporting setup: `color-eyre` for panic/error reports, `simplelog` for a
//! terminal (plus optional file) logger.

use std::{fs::File, path::Path};

use color_eyre::eyre::{self, Context};

pub fn init_eyre() -> eyre::Result<()> {
    use color_eyre::config::{HookBuilder, Theme};
    let eyre_color = if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        Theme::dark()
    } else {
        Theme::new()
    };

    HookBuilder::default()
        .theme(eyre_color)
        .install()
        .wrap_err("failed to install eyre")
}

pub fn init_logger(logfile: Option<&Path>, verbose: bool) -> eyre::Result<()> {
    use simplelog::*;

    let mut builder = ConfigBuilder::new();
    builder.set_thread_level(LevelFilter::Error);
    builder.set_target_level(LevelFilter::Error);
    builder.set_location_level(LevelFilter::Trace);
    builder.set_level_padding(LevelPadding::Right);

    let timezone_failed = builder.set_time_offset_to_local().is_err();

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_color = if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> =
        vec![TermLogger::new(level, builder.build(), TerminalMode::Stdout, log_color)];

    let logfile_failed = logfile.and_then(|logfile| match File::create(logfile) {
        Ok(f) => {
            loggers.push(WriteLogger::new(level, builder.build(), f));
            None
        }
        Err(e) => Some(e),
    });

    CombinedLogger::init(loggers).wrap_err("failed to set the logger")?;

    if timezone_failed {
        log::error!("failed to set time zone for the logger, using UTC instead");
    }

    if let Some(logfile) = logfile {
        if let Some(e) = logfile_failed {
            log::error!("failed to create the log file at '{}' because: {e}", logfile.display());
        } else {
            log::debug!("logging to: {}", logfile.display());
        }
    }

    Ok(())
}
