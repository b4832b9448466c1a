use anyhow::Context;
use gfn_protocol::VideoCodec;

pub(crate) const DEFAULT_FRAMERATE: u32 = 60;
pub(crate) const DEFAULT_MAX_BITRATE_MBPS: u32 = 50;

pub(crate) struct Args {
    pub config_path: std::path::PathBuf,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub app_id: u32,
    pub store_type: String,
    pub store_id: String,
    pub preferred_server: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub codec: VideoCodec,
    pub max_bitrate_mbps: u32,
    pub reflex: bool,
}

pub(crate) fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./config/gfn-client.toml")
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut config_path = default_config_path();
    let mut base_url = None;
    let mut token = None;
    let mut app_id = None;
    let mut store_type = "GFN".to_string();
    let mut store_id = None;
    let mut preferred_server = None;
    let mut width: u32 = 1920;
    let mut height: u32 = 1080;
    let mut framerate: u32 = DEFAULT_FRAMERATE;
    let mut codec = VideoCodec::H264;
    let mut max_bitrate_mbps: u32 = DEFAULT_MAX_BITRATE_MBPS;
    let mut reflex = false;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("gfn-client {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("gfn-client - GeForce NOW cloud-streaming client");
                println!();
                println!("USAGE:");
                println!("    gfn-client [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --config <PATH>              TOML config file [default: ./config/gfn-client.toml]");
                println!("    --base-url <URL>             GFN session API base URL (overrides config)");
                println!("    --token <JWT>                Bearer token (prefer GFN_TOKEN env)");
                println!("    --app-id <ID>                Game/app id (required)");
                println!("    --store-type <NAME>          Store backing the app id [default: GFN]");
                println!("    --store-id <ID>              Store-specific id (required)");
                println!("    --preferred-server <ID>      Preferred GFN server region");
                println!("    --width <PIXELS>             Stream width [default: 1920]");
                println!("    --height <PIXELS>            Stream height [default: 1080]");
                println!("    --framerate <FPS>            Target framerate [default: 60]");
                println!("    --codec <h264|h265|av1>      Video codec [default: h264]");
                println!("    --max-bitrate <MBPS>         Max video bitrate [default: 50]");
                println!("    --reflex                     Request NVIDIA Reflex low-latency mode");
                println!("    -V, --version                Print version and exit");
                println!("    -h, --help                   Print this help and exit");
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                config_path = std::path::PathBuf::from(args.get(i).context("Missing --config value")?);
            }
            "--base-url" => {
                i += 1;
                base_url = Some(args.get(i).context("Missing --base-url value")?.clone());
            }
            "--token" => {
                i += 1;
                token = Some(args.get(i).context("Missing --token value")?.clone());
            }
            "--app-id" => {
                i += 1;
                app_id = Some(
                    args.get(i)
                        .context("Missing --app-id value")?
                        .parse::<u32>()
                        .context("Invalid --app-id value")?,
                );
            }
            "--store-type" => {
                i += 1;
                store_type = args.get(i).context("Missing --store-type value")?.clone();
            }
            "--store-id" => {
                i += 1;
                store_id = Some(args.get(i).context("Missing --store-id value")?.clone());
            }
            "--preferred-server" => {
                i += 1;
                preferred_server = Some(args.get(i).context("Missing --preferred-server value")?.clone());
            }
            "--width" => {
                i += 1;
                width = args.get(i).context("Missing --width value")?.parse().context("Invalid --width value")?;
            }
            "--height" => {
                i += 1;
                height = args.get(i).context("Missing --height value")?.parse().context("Invalid --height value")?;
            }
            "--framerate" => {
                i += 1;
                framerate = args
                    .get(i)
                    .context("Missing --framerate value")?
                    .parse()
                    .context("Invalid --framerate value")?;
            }
            "--codec" => {
                i += 1;
                codec = match args.get(i).context("Missing --codec value")?.to_ascii_lowercase().as_str() {
                    "h264" => VideoCodec::H264,
                    "h265" | "hevc" => VideoCodec::H265,
                    "av1" => VideoCodec::Av1,
                    other => anyhow::bail!("Unknown codec: {other}"),
                };
            }
            "--max-bitrate" => {
                i += 1;
                max_bitrate_mbps = args
                    .get(i)
                    .context("Missing --max-bitrate value")?
                    .parse()
                    .context("Invalid --max-bitrate value")?;
            }
            "--reflex" => {
                reflex = true;
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    // Prefer env var for the bearer token (CLI args are visible in /proc).
    if token.is_none() {
        token = std::env::var("GFN_TOKEN").ok();
    }

    Ok(Args {
        config_path,
        base_url,
        token,
        app_id: app_id.context("--app-id is required")?,
        store_type,
        store_id: store_id.context("--store-id is required")?,
        preferred_server,
        width,
        height,
        framerate,
        codec,
        max_bitrate_mbps,
        reflex,
    })
}
