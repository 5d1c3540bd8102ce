use clap::Parser;
use crossbeam_channel as chan;
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

mod audio;
mod buffer;
mod config;
mod error;
mod estimator;
mod event_log;
mod motion;
mod render;
mod session;
mod types;
mod ui;

use audio::AudioSampler;
use config::{Cli, Settings};
use error::{AudioError, MotionError};
use motion::{MotionSampler, open_source};
use session::{MicrophoneAction, Session};
use types::{AudioStatus, MotionStatus, SensorEvent};
use ui::{Action, App, draw_ui, handle_events, init_terminal, restore_terminal};

fn init_tracing(path: &Path) -> Result<WorkerGuard, anyhow::Error> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("--log-file needs a file name"))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vibra=info".into()),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn start_motion(
    settings: &Settings,
    session: &mut Session,
    tx: chan::Sender<SensorEvent>,
) -> Option<MotionSampler> {
    match open_source(settings) {
        Ok(Some(source)) => Some(MotionSampler::spawn(source, tx)),
        Ok(None) => {
            session.set_motion_status(MotionStatus::Stopped);
            None
        }
        Err(MotionError::Unsupported(reason)) => {
            tracing::warn!(%reason, "motion sensing unavailable");
            session.set_motion_status(MotionStatus::Unsupported);
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open motion source");
            session.set_motion_status(MotionStatus::Failed(e.to_string()));
            None
        }
    }
}

/// Opens or releases the microphone. After a failed request it stays off.
fn toggle_microphone(
    app: &mut App,
    audio: &mut Option<AudioSampler>,
    tx: &chan::Sender<SensorEvent>,
) {
    match app.session.microphone_action() {
        MicrophoneAction::Refuse => return,
        MicrophoneAction::Release => {
            if let Some(mut sampler) = audio.take() {
                sampler.stop();
            }
            app.session.set_audio_status(AudioStatus::Paused);
            return;
        }
        MicrophoneAction::Request => {}
    }

    match AudioSampler::start(&app.session.settings().analyser, tx.clone()) {
        Ok(sampler) => {
            app.audio_device = Some((sampler.device_name().to_string(), sampler.sample_rate()));
            app.session.set_audio_status(AudioStatus::Measuring);
            *audio = Some(sampler);
        }
        Err(e) => {
            tracing::error!(error = %e, "error accessing microphone");
            let status = match e {
                AudioError::Unsupported(reason) => AudioStatus::Unsupported(reason),
                AudioError::AccessDenied(reason) => AudioStatus::AccessDenied(reason),
                AudioError::Stream(reason) => AudioStatus::Failed(reason),
            };
            app.session.set_audio_status(status);
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;

    let _log_guard = match &cli.log_file {
        Some(path) => Some(init_tracing(path)?),
        None => None,
    };
    tracing::info!(profile = ?settings.profile, "starting");

    let mut terminal = init_terminal()?;

    ctrlc::set_handler(move || {
        let _ = restore_terminal();
        std::process::exit(0);
    })?;

    let (tx, rx) = chan::bounded::<SensorEvent>(256);
    let mut app = App::new(Session::new(settings.clone()));

    let mut motion = start_motion(&settings, &mut app.session, tx.clone());
    let mut audio: Option<AudioSampler> = None;
    if settings.mic_at_start {
        toggle_microphone(&mut app, &mut audio, &tx);
    }

    let mut bins = vec![0u8; settings.analyser.bin_count()];
    let frame_duration = Duration::from_millis(16); // ~60 FPS

    let result = (|| -> Result<(), anyhow::Error> {
        loop {
            while let Ok(event) = rx.try_recv() {
                app.session.handle(event);
            }

            if app.session.audio_status.is_terminal() {
                if let Some(mut sampler) = audio.take() {
                    sampler.stop();
                }
            }

            if let Some(sampler) = audio.as_mut() {
                bins.resize(sampler.bin_count(), 0);
                match sampler.frequency_data(&mut bins) {
                    Ok(()) => {
                        app.session.on_spectrum(&bins);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "frequency analysis failed");
                        app.session.set_audio_status(AudioStatus::Failed(e.to_string()));
                    }
                }
            }

            match handle_events()? {
                Some(Action::Quit) => app.should_quit = true,
                Some(Action::ToggleMicrophone) => toggle_microphone(&mut app, &mut audio, &tx),
                None => {}
            }

            if app.should_quit {
                break;
            }

            terminal.draw(|f| draw_ui(f, &app))?;

            std::thread::sleep(frame_duration);
        }
        Ok(())
    })();

    if let Some(mut sampler) = audio.take() {
        sampler.stop();
    }
    if let Some(mut sampler) = motion.take() {
        sampler.stop();
    }
    tracing::info!("stopped");

    restore_terminal()?;
    result
}
