use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use monmix_protocol::ChannelClass;

#[derive(Parser, Debug)]
#[command(name = "monmix", about = "Monitor-mix server CLI")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Server URL
    #[arg(short, long, default_value = "http://localhost:8080", env = "MONMIX_URL", global = true)]
    url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show server and console status
    Status,
    /// Connect to the console, optionally with new settings
    Connect {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Use the built-in simulator
        #[arg(long)]
        simulated: bool,
    },
    /// Disconnect from the console and stop the watchdog
    Disconnect,
    /// Show watchdog status, or start/stop it
    Watchdog {
        #[command(subcommand)]
        action: Option<WatchdogAction>,
    },
    /// Show this machine's network and the candidate console ports
    Network,
    /// Scan the local /24 for consoles
    Scan {
        /// Subnet prefix, e.g. 192.168.1 (default: this machine's)
        #[arg(long)]
        subnet: Option<String>,
        /// Only list hosts that answered like a console
        #[arg(long)]
        targets_only: bool,
    },
    /// Read or set a channel gain (dB)
    Gain {
        class: ChannelClass,
        channel: u16,
        #[arg(allow_negative_numbers = true)]
        db: Option<f32>,
    },
    /// Read or set a channel's send into an output bus (dB)
    Send {
        class: ChannelClass,
        channel: u16,
        bus: u16,
        #[arg(allow_negative_numbers = true)]
        db: Option<f32>,
        /// Use the bus gain if the console rejects the send
        #[arg(long)]
        fallback: bool,
    },
    /// Mute or unmute a channel
    Mute {
        class: ChannelClass,
        channel: u16,
        /// Unmute instead
        #[arg(long)]
        off: bool,
    },
    /// Read or recall a preset
    Preset { number: Option<u16> },
    /// Read a channel's VU level
    Vu { class: ChannelClass, channel: u16 },
}

#[derive(Subcommand, Debug)]
enum WatchdogAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.url.trim_end_matches('/');

    match args.command {
        Commands::Status => {
            let resp: Value = client
                .get(format!("{}/api/status", base))
                .send().await?
                .json().await?;
            println!("Monitor-mix Status");
            println!("══════════════════════════════");
            println!("  Version:      {}", resp["version"].as_str().unwrap_or("?"));
            println!("  Uptime:       {}s", resp["uptime_seconds"]);
            println!("  Console:      {}", resp["console"].as_str().unwrap_or("?"));
            println!("  Simulated:    {}", resp["simulated"]);
            println!("  Connected:    {}", resp["connected"]);
            println!("  Pending cmds: {}", resp["pending_commands"]);
            println!("  Watchdog:     {} ({} attempts)", resp["watchdog_state"].as_str().unwrap_or("?"), resp["watchdog_attempts"]);
            println!("  Subscribers:  {}", resp["subscribers"]);
            if let Some(err) = resp["last_error"].as_str() {
                println!("  Last error:   {}", err);
            }
        }
        Commands::Connect { host, port, simulated } => {
            let mut body = json!({});
            if let Some(host) = host {
                body["host"] = json!(host);
                body["simulated"] = json!(false);
            }
            if let Some(port) = port {
                body["port"] = json!(port);
            }
            if simulated {
                body["simulated"] = json!(true);
            }
            let resp: Value = client
                .post(format!("{}/api/connection/connect", base))
                .json(&body)
                .send().await?
                .json().await?;
            if ok(&resp) {
                let config = &resp["connection"]["config"];
                println!("  Connected to {}:{}", config["host"].as_str().unwrap_or("?"), config["port"]);
            } else {
                println!("  Connect failed: {}", error(&resp));
            }
        }
        Commands::Disconnect => {
            let resp: Value = client
                .post(format!("{}/api/connection/disconnect", base))
                .send().await?
                .json().await?;
            if ok(&resp) {
                println!("  Disconnected");
            } else {
                println!("  Disconnect failed: {}", error(&resp));
            }
        }
        Commands::Watchdog { action } => {
            let request = match action {
                None => client.get(format!("{}/api/watchdog", base)),
                Some(WatchdogAction::Start) => client.post(format!("{}/api/watchdog/start", base)),
                Some(WatchdogAction::Stop) => client.post(format!("{}/api/watchdog/stop", base)),
            };
            let resp: Value = request.send().await?.json().await?;
            let wd = &resp["watchdog"];
            println!("Watchdog");
            println!("══════════════════════════════");
            println!("  State:        {}", wd["state"].as_str().unwrap_or("?"));
            println!("  Attempts:     {}", wd["attempts"]);
            println!("  Interval:     {}ms", wd["current_interval_ms"]);
            if let Some(next) = wd["next_attempt_ms"].as_u64() {
                println!("  Next attempt: {}", next);
            }
            if let Some(err) = wd["last_error"].as_str() {
                println!("  Last error:   {}", err);
            }
        }
        Commands::Network => {
            let resp: Value = client
                .get(format!("{}/api/network", base))
                .send().await?
                .json().await?;
            let net = &resp["network"];
            println!("Network");
            println!("══════════════════════════════");
            println!("  Server IP:    {}", net["server_ip"].as_str().unwrap_or("unknown"));
            println!("  Subnet:       {}", net["subnet"].as_str().unwrap_or("unknown"));
            println!("  Ports:        {}", net["candidate_ports"]);
        }
        Commands::Scan { subnet, targets_only } => {
            println!("Scanning...");
            let resp: Value = client
                .post(format!("{}/api/network/scan", base))
                .json(&json!({ "subnet": subnet }))
                .send().await?
                .json().await?;
            if !ok(&resp) {
                println!("  Scan failed: {}", error(&resp));
                return Ok(());
            }
            println!("Scan Results ({} open, {} consoles)", resp["found"], resp["targets"]);
            println!("══════════════════════════════");
            if let Some(results) = resp["results"].as_array() {
                for r in results {
                    let target = r["is_target_device"].as_bool().unwrap_or(false);
                    if targets_only && !target {
                        continue;
                    }
                    println!("  {} {}:{} ({}ms) {}",
                        if target { "*" } else { " " },
                        r["host"].as_str().unwrap_or("?"), r["port"], r["latency_ms"],
                        r["response"].as_str().unwrap_or("").trim());
                }
            }
        }
        Commands::Gain { class, channel, db } => {
            let url = format!("{}/api/mixer/gain/{}/{}", base, class, channel);
            let resp: Value = match db {
                Some(db) => client.put(url).json(&json!({ "db": db })).send().await?.json().await?,
                None => client.get(url).send().await?.json().await?,
            };
            print_level(&format!("{} {} gain", class, channel), &resp);
        }
        Commands::Send { class, channel, bus, db, fallback } => {
            let url = format!("{}/api/mixer/send/{}/{}/{}", base, class, channel, bus);
            let resp: Value = match db {
                Some(db) => client
                    .put(url)
                    .json(&json!({ "db": db, "fallback": fallback }))
                    .send().await?
                    .json().await?,
                None => client
                    .get(url)
                    .query(&[("fallback", fallback)])
                    .send().await?
                    .json().await?,
            };
            print_level(&format!("{} {} -> bus {}", class, channel, bus), &resp);
            if resp["fallback"].as_bool().unwrap_or(false) {
                println!("  (send unsupported, bus gain used)");
            }
        }
        Commands::Mute { class, channel, off } => {
            let resp: Value = client
                .put(format!("{}/api/mixer/mute/{}/{}", base, class, channel))
                .json(&json!({ "muted": !off }))
                .send().await?
                .json().await?;
            if ok(&resp) {
                println!("  {} {} {}", class, channel, if off { "unmuted" } else { "muted" });
            } else {
                println!("  Mute failed: {}", error(&resp));
            }
        }
        Commands::Preset { number } => {
            let url = format!("{}/api/mixer/preset", base);
            let resp: Value = match number {
                Some(preset) => client.put(url).json(&json!({ "preset": preset })).send().await?.json().await?,
                None => client.get(url).send().await?.json().await?,
            };
            if resp["preset"].is_null() {
                println!("  Preset failed: {}", error(&resp));
            } else {
                println!("  Preset: {}", resp["preset"]);
            }
        }
        Commands::Vu { class, channel } => {
            let resp: Value = client
                .get(format!("{}/api/mixer/vu/{}/{}", base, class, channel))
                .send().await?
                .json().await?;
            print_level(&format!("{} {} VU", class, channel), &resp);
        }
    }

    Ok(())
}

fn ok(resp: &Value) -> bool {
    resp["success"].as_bool().unwrap_or(true) && resp.get("error").is_none()
}

fn error(resp: &Value) -> &str {
    resp["error"].as_str().unwrap_or("unknown error")
}

fn print_level(label: &str, resp: &Value) {
    match resp["db"].as_f64() {
        Some(db) => println!("  {}: {:.1} dB", label, db),
        None => println!("  {} failed: {}", label, error(resp)),
    }
}
