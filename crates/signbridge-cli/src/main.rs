use anyhow::Result;
use clap::Parser;
use signbridge_client::frames::{
    FrameSource, DEFAULT_FRAMES_PER_SECOND, DEFAULT_JPEG_QUALITY,
};
use signbridge_client::pcm::PLAYBACK_SAMPLE_RATE_HZ;
use signbridge_client::playback::CpalSink;
use signbridge_client::session::{DEFAULT_LIVE_URL, DEFAULT_MODEL, DEFAULT_VOICE};
use signbridge_client::transcript::{parse_segments, Segment};
use signbridge_client::{
    BridgeEvent, SessionConfig, SessionController, Speaker, TranscriptionEntry,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod camera;

#[derive(Parser, Debug)]
#[command(name = "signbridge", version, about = "Realtime sign/speech accessibility bridge")]
struct Args {
    /// WebSocket URL of the realtime service
    #[arg(long, default_value = DEFAULT_LIVE_URL)]
    url: String,

    /// API key for the service; required at startup
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Model to open the session against
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Voice for the spoken replies
    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    /// Camera frames per second
    #[arg(long, default_value_t = DEFAULT_FRAMES_PER_SECOND)]
    fps: f64,

    /// Camera JPEG quality in [0, 1]
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: f32,

    /// Video device handed to the default capture command
    #[arg(long, default_value = "/dev/video0")]
    camera_device: String,

    /// Override the capture command (whitespace-separated; must write an
    /// MJPEG stream to stdout)
    #[arg(long)]
    camera_command: Option<String>,

    /// Run without a camera (speech-to-sign text only)
    #[arg(long)]
    no_camera: bool,

    /// Start with the microphone muted
    #[arg(long)]
    no_mic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = SessionConfig::new(&args.api_key);
    config.url = args.url.clone();
    config.model = args.model.clone();
    config.voice = args.voice.clone();
    config.frames_per_second = args.fps;

    let sink = CpalSink::start_default(PLAYBACK_SAMPLE_RATE_HZ)
        .map_err(|e| anyhow::anyhow!("audio output failed: {e}"))?;
    let mut controller = SessionController::new(config, sink);

    if args.no_mic {
        controller.set_mic_enabled(false);
    }
    if args.no_camera {
        controller.set_cam_enabled(false);
    }

    let frame_source: Option<Box<dyn FrameSource>> = if args.no_camera {
        None
    } else {
        let command = match &args.camera_command {
            Some(custom) => custom.split_whitespace().map(str::to_string).collect(),
            None => {
                camera::default_capture_command(&args.camera_device, args.fps, args.jpeg_quality)
            }
        };
        match camera::MjpegPipeSource::start(&command) {
            Ok(source) => Some(Box::new(source)),
            Err(e) => {
                eprintln!("camera failed ({e}); continuing audio-only");
                None
            }
        }
    };

    eprintln!("Connecting...");
    if let Err(e) = controller.connect(frame_source).await {
        anyhow::bail!("could not start session: {e}");
    }
    eprintln!("Connected. Speak or sign; type `mic`, `cam` or `quit` + enter. Ctrl+C ends.");

    let toggles = controller.toggles();
    print_status(&toggles);

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
            line = stdin_lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "mic" => {
                        toggles.set_mic_enabled(!toggles.mic_enabled());
                        print_status(&toggles);
                    }
                    "cam" => {
                        toggles.set_cam_enabled(!toggles.cam_enabled());
                        print_status(&toggles);
                    }
                    "quit" | "q" => break,
                    other => eprintln!("unknown command {other:?} (try mic, cam, quit)"),
                }
            }
            ev = controller.next_event() => {
                match ev {
                    Some(BridgeEvent::EntryAdded(entry)) => render_entry(&entry),
                    Some(BridgeEvent::Interrupted) => {
                        eprintln!("-- interrupted, playback cleared --");
                    }
                    Some(BridgeEvent::Closed { reason }) => {
                        eprintln!("session closed by remote: {reason}");
                        break;
                    }
                    Some(BridgeEvent::Error { message }) => {
                        eprintln!("session error: {message}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    controller.close().await;
    eprintln!("Session ended.");
    Ok(())
}

fn print_status(toggles: &signbridge_client::Toggles) {
    eprintln!(
        "[mic {}] [cam {}]",
        if toggles.mic_enabled() { "on" } else { "off" },
        if toggles.cam_enabled() { "on" } else { "off" },
    );
}

/// Render one finalized utterance; embedded sign guides become their own
/// blocks, in the order they appear in the text.
fn render_entry(entry: &TranscriptionEntry) {
    let speaker = match entry.speaker {
        Speaker::Local => "you",
        Speaker::Remote => "bridge",
    };
    println!("[{}] {speaker}:", entry.timestamp.format("%H:%M:%S"));

    for segment in parse_segments(&entry.text) {
        match segment {
            Segment::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    println!("  {text}");
                }
            }
            Segment::SignGuide { word, description } => {
                println!("  +- sign guide: \"{word}\"");
                println!("  |  {description}");
            }
        }
    }
}
