use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use log::info;
use sfx_voice::{
    DeviceId, DeviceNotifier, EngineConfig, PlayParams, PlaybackInstance, PlaybackStatus, Sample,
    SampleTags, SoftMixer, WavExporter,
};

const TONE_HZ: f32 = 440.0;
const BLIP_HZ: f32 = 1_760.0;

struct Options {
    config: Option<PathBuf>,
    out: PathBuf,
    pitch: f32,
    seconds: f32,
    live: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            config: None,
            out: PathBuf::from("sfx-demo.wav"),
            pitch: 0.5,
            seconds: 2.0,
            live: false,
        }
    }
}

fn usage() {
    eprintln!(
        "Usage:\n  sfx-voice [--config <file.json>] [--out <file.wav>] [--pitch <-1..1>] [--seconds <n>]{}\n\nFlags:\n  --config <file>   Engine configuration (JSON)\n  --out <file>      WAV file to render into (default sfx-demo.wav)\n  --pitch <p>       Pitch applied half way through (default 0.5)\n  --seconds <n>     Render length (default 2)\n{}  -h, --help        Show this help\n",
        if cfg!(feature = "streaming") {
            " [--live]"
        } else {
            ""
        },
        if cfg!(feature = "streaming") {
            "  --live            Play through the default audio device instead of writing a file\n"
        } else {
            ""
        }
    );
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut options = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                options.config = Some(PathBuf::from(value));
            }
            "--out" => {
                let value = args.next().context("--out requires a path")?;
                options.out = PathBuf::from(value);
            }
            "--pitch" => {
                let value = args.next().context("--pitch requires a value")?;
                options.pitch = value
                    .parse()
                    .with_context(|| format!("invalid pitch: {value}"))?;
            }
            "--seconds" => {
                let value = args.next().context("--seconds requires a value")?;
                options.seconds = value
                    .parse()
                    .with_context(|| format!("invalid length: {value}"))?;
            }
            "--live" if cfg!(feature = "streaming") => options.live = true,
            _ => bail!("unknown argument: {arg}"),
        }
    }
    if !(options.seconds.is_finite() && options.seconds > 0.0) {
        bail!("--seconds must be a positive number");
    }
    Ok(Some(options))
}

/// Decaying sine, 16-bit mono
fn synth_tone(sample_rate: u32, freq: f32, seconds: f32) -> anyhow::Result<Sample> {
    let frames = (sample_rate as f32 * seconds) as usize;
    let pcm: Vec<i16> = (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let env = (-3.0 * t).exp();
            ((t * freq * std::f32::consts::TAU).sin() * env * 0.8 * i16::MAX as f32) as i16
        })
        .collect();
    Ok(Sample::from_i16(&pcm, sample_rate, 1)?)
}

fn print_status(label: &str, status: &PlaybackStatus) {
    println!(
        "  {label:<6} {:?}  {:>6.3}s / {:.3}s  vol {:.2}  pan {:+.2}  pitch {:+.2}  loop {}  {}",
        status.state,
        status.position.as_secs_f32(),
        status.duration.as_secs_f32(),
        status.volume,
        status.pan,
        status.pitch,
        status.looping,
        if status.promoted { "stream" } else { "channel" }
    );
}

fn run() -> anyhow::Result<()> {
    let Some(options) = parse_args()? else {
        usage();
        return Ok(());
    };

    let config = match &options.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    println!("Sound-effect playback demo");
    println!("==========================\n");
    println!(
        "Mixer: {} Hz, {} ch, {} voices, {}-byte stream chunks\n",
        config.sample_rate, config.channels, config.max_channels, config.stream_chunk_bytes
    );

    let mixer = Arc::new(SoftMixer::new(config.clone())?);
    let notifier = DeviceNotifier::new();

    let tone = Arc::new(
        synth_tone(config.sample_rate, TONE_HZ, 1.0)?
            .with_tags(SampleTags::with_title_artist("tone", "sfx-voice")),
    );
    let blip = Arc::new(synth_tone(config.sample_rate, BLIP_HZ, 0.25)?);

    let lead = Arc::new(PlaybackInstance::new(mixer.clone(), &config));
    let bed = Arc::new(PlaybackInstance::new(mixer.clone(), &config));
    notifier.subscribe(lead.clone());
    notifier.subscribe(bed.clone());

    if !lead.play(&tone, PlayParams::default().volume(0.8).looping(true))? {
        bail!("no channel available for the lead voice");
    }
    if !bed.play(&blip, PlayParams::default().volume(0.3).pan(-0.6).looping(true))? {
        bail!("no channel available for the background voice");
    }

    let half = Duration::from_secs_f32(options.seconds / 2.0);

    if options.live {
        run_live(&mixer, &lead, options.pitch, half)?;
    } else {
        let mut exporter = WavExporter::create(&mixer, &options.out)
            .with_context(|| format!("failed to create {}", options.out.display()))?;
        exporter.render(half)?;
        print_status("lead", &lead.status());

        lead.set_pitch(options.pitch)?;
        bed.slide_pan(0.6, half)?;
        info!("lead promoted: {}", lead.is_promoted());

        exporter.render(half)?;
        print_status("lead", &lead.status());
        print_status("bed", &bed.status());

        let frames = exporter.finalize()?;
        println!(
            "\nWrote {} frames ({:.2}s) to {}",
            frames,
            frames as f32 / config.sample_rate as f32,
            options.out.display()
        );
    }

    // Simulated output switch: listeners stop first, then the mixer rebinds
    let device = DeviceId::new("demo-output");
    let notified = notifier.notify(&device);
    mixer.rebind(device);
    println!(
        "Device change delivered to {} instances, {} voices left",
        notified,
        mixer.live_voices()
    );

    Ok(())
}

#[cfg(feature = "streaming")]
fn run_live(
    mixer: &Arc<SoftMixer>,
    lead: &PlaybackInstance,
    pitch: f32,
    half: Duration,
) -> anyhow::Result<()> {
    let device = sfx_voice::AudioDevice::new(mixer.clone())?;
    println!("Audio device initialized - playing to speakers\n");
    std::thread::sleep(half);
    print_status("lead", &lead.status());
    lead.slide_pitch(pitch, half / 2)?;
    std::thread::sleep(half);
    print_status("lead", &lead.status());
    device.finish();
    Ok(())
}

#[cfg(not(feature = "streaming"))]
fn run_live(
    _mixer: &Arc<SoftMixer>,
    _lead: &PlaybackInstance,
    _pitch: f32,
    _half: Duration,
) -> anyhow::Result<()> {
    bail!("live output requires the \"streaming\" feature")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    run()
}
