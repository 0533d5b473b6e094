use color_eyre::{eyre::eyre, Result};
use inputfeatures::adapter::{GilrsAdapter, GilrsTransport};
use inputfeatures::device::AdapterError;
use inputfeatures::{Controller, ControllerState, DriverHandle, InputConfig, IoFeature};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = InputConfig::default_path()?;
    let config = InputConfig::ensure_default_config(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load {}: {}", config_path.display(), e))?;
    info!("Using configuration: {:?}", config);

    let transport =
        GilrsTransport::new().map_err(|e| eyre!("Failed to open gamepad transport: {}", e))?;
    let gamepad = match transport.gamepad(config.gamepad.index) {
        Ok(gamepad) => gamepad,
        Err(AdapterError::NotFound(e)) => {
            warn!("{}, nothing to do", e);
            return Ok(());
        }
        Err(e) => return Err(eyre!("Failed to enumerate gamepads: {}", e)),
    };
    info!("Selected gamepad: {} ({})", gamepad.name, gamepad.id);

    let settings = config.gilrs_settings();
    let controller = Controller::new(&gamepad.name, |layout| {
        Box::new(GilrsAdapter::new(
            transport.clone(),
            gamepad.id,
            layout.clone(),
            settings,
        ))
    })
    .map_err(|e| eyre!("Failed to set up controller: {}", e))?;
    let state = controller.state();

    let handle = DriverHandle::spawn(Box::new(controller), Some(config.driver_settings()))
        .map_err(|e| eyre!("Failed to spawn polling driver: {}", e))?;
    let mut frames = handle.subscribe();

    info!("Polling started, press Ctrl+C to stop");
    let mut last_pressed = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }

            changed = frames.changed() => {
                if changed.is_err() {
                    warn!("Polling driver stopped unexpectedly");
                    break;
                }
                last_pressed = report(&state, last_pressed);
            }
        }
    }

    let stats = handle.stats();
    handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Failed to stop polling driver: {}", e))?;
    info!("Final driver stats:\n{}", toml::to_string_pretty(&stats)?);
    Ok(())
}

// Logs button changes and lets the right trigger drive the rumble motors
fn report(state: &ControllerState, last_pressed: Vec<String>) -> Vec<String> {
    let pressed: Vec<String> = state
        .pressed()
        .iter()
        .map(|button| button.id().to_string())
        .collect();
    if pressed != last_pressed {
        info!("Buttons held: {:?}", pressed);
    }

    let (ls, rs) = (state.ls.position(), state.rs.position());
    debug!(
        "ls=({:.2}, {:.2}) rs=({:.2}, {:.2}) lt={:.2} rt={:.2}",
        ls.x,
        ls.y,
        rs.x,
        rs.y,
        state.lt.force(),
        state.rt.force()
    );
    state.rumble(state.rt.force());
    pressed
}

fn setup() -> Result<()> {
    if std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0");
    }
    color_eyre::install()?;
    init_tracing(log_level());
    Ok(())
}

// RUST_LOG holds a single level name here; anything else falls back to info
fn log_level() -> Level {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.trim().parse().ok())
        .unwrap_or(Level::INFO)
}

fn init_tracing(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
