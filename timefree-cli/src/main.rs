mod cli;
mod config;
mod error;
mod output;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use timefree_engine::{
    AccelerationReport, Assembler, AuthSession, ParallelAccelerator, ProgramLookup,
    ProgramMetadata, ProgramRef, ProgramResolver, ReqwestTransport, TimefreeError, Transport,
};

use crate::{
    cli::Args,
    config::AppConfig,
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    match run(args, token).await {
        Ok(path) => info!(output = %path.display(), "Done"),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}

async fn run(args: Args, token: CancellationToken) -> Result<PathBuf> {
    let reference = program_ref(&args)?;
    let app_config = AppConfig::load(args.config.as_deref())?;
    let config = Arc::new(app_config.engine_config(&args));
    config.validate()?;

    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config.http)?);

    let auth = AuthSession::new(
        transport.clone(),
        config.service.clone(),
        config.retry.clone(),
        token.clone(),
    )
    .authenticate()
    .await
    .map_err(interrupted)?;

    let resolver = ProgramResolver::new(
        transport.clone(),
        config.service.clone(),
        config.retry.clone(),
        token.clone(),
    );
    let program = match resolver
        .resolve(&reference.station_id, &reference.start_at, &auth.area_id)
        .await
        .map_err(interrupted)?
    {
        ProgramLookup::Found(program) => program,
        ProgramLookup::NotFound => {
            return Err(TimefreeError::ProgramNotFound {
                station_id: reference.station_id,
                start_at: reference.start_at.to_string(),
            }
            .into());
        }
    };
    info!(
        title = %program.title,
        station = %program.station_id,
        start = %program.start,
        end = %program.end,
        "Resolved program"
    );

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| app_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let output_path = args.output.clone().unwrap_or_else(|| {
        output_dir.join(output::output_file_name(
            &program,
            config.assemble.output_extension(),
        ))
    });
    let work_dir = args
        .work_dir
        .clone()
        .unwrap_or_else(|| output::work_dir_for(&output_dir, &program));

    let accelerator =
        ParallelAccelerator::new(transport, Arc::new(auth), config.clone(), token.clone());
    let report = accelerator
        .download(&program, &work_dir)
        .await
        .map_err(interrupted)?;
    check_report(&program, &report, args.strict)?;

    let assembled = Assembler::new(config.assemble.clone(), token.clone())
        .assemble(&work_dir, &output_path)
        .await
        .map_err(interrupted)?;
    info!(segments = assembled.segments, "Assembly finished");

    if !config.assemble.keep_segments {
        remove_work_dir(&work_dir).await;
    }
    Ok(assembled.output)
}

fn program_ref(args: &Args) -> Result<ProgramRef> {
    let parsed = match (&args.reference, &args.station, &args.start) {
        (Some(reference), _, _) => ProgramRef::parse(reference),
        (None, Some(station), Some(start)) => ProgramRef::new(station, start),
        _ => {
            return Err(AppError::InvalidInput(
                "either a page reference or --station with --start is required".to_owned(),
            ));
        }
    };
    Ok(parsed?)
}

/// Every hole in the output is reported: segments that failed to download and
/// sessions that failed before their slice was ever listed.
fn check_report(program: &ProgramMetadata, report: &AccelerationReport, strict: bool) -> Result<()> {
    info!(
        sessions = report.sessions,
        failed_sessions = report.failed_sessions,
        downloaded = report.fetch.downloaded,
        already_present = report.fetch.already_present,
        bytes = report.fetch.bytes,
        "Download finished"
    );

    let failed_segments = report.fetch.failed.len();
    if failed_segments == 0 && report.failed_sessions == 0 {
        return Ok(());
    }
    warn!(
        title = %program.title,
        failed_segments,
        failed_sessions = report.failed_sessions,
        keys = ?report.fetch.failed,
        "Parts of the program could not be downloaded; the output will have gaps"
    );
    if strict {
        return Err(AppError::Incomplete {
            failed_segments,
            failed_sessions: report.failed_sessions,
        });
    }
    Ok(())
}

/// Removes the segment directory once it is empty; leftovers are kept for inspection.
async fn remove_work_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir(dir).await {
        warn!(dir = %dir.display(), error = %e, "Could not remove segment directory");
    }
}

fn interrupted(error: TimefreeError) -> AppError {
    match error {
        TimefreeError::Cancelled => AppError::Interrupted,
        other => AppError::Engine(other),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use timefree_engine::{FetchSummary, Timestamp};

    fn program() -> ProgramMetadata {
        ProgramMetadata {
            station_id: "TBS".to_owned(),
            start: Timestamp::parse("20240101120000").unwrap(),
            end: Timestamp::parse("20240101121500").unwrap(),
            title: "Noon".to_owned(),
        }
    }

    fn report(failed_sessions: usize, failed: &[&str]) -> AccelerationReport {
        AccelerationReport {
            batches: 1,
            sessions: 4,
            failed_sessions,
            fetch: FetchSummary {
                failed: failed.iter().map(|k| (*k).to_owned()).collect(),
                ..FetchSummary::default()
            },
        }
    }

    #[test]
    fn complete_download_passes_strict() {
        assert!(check_report(&program(), &report(0, &[]), true).is_ok());
    }

    #[test]
    fn failed_session_is_a_gap() {
        // a session that never listed its slice leaves no failed keys behind
        let gap = report(1, &[]);
        assert!(check_report(&program(), &gap, false).is_ok());
        assert!(matches!(
            check_report(&program(), &gap, true),
            Err(AppError::Incomplete {
                failed_segments: 0,
                failed_sessions: 1
            })
        ));
    }

    #[test]
    fn failed_segment_is_a_gap() {
        assert!(matches!(
            check_report(&program(), &report(0, &["0070.aac"]), true),
            Err(AppError::Incomplete {
                failed_segments: 1,
                failed_sessions: 0
            })
        ));
    }
}
