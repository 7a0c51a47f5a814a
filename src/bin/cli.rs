use mini_resp::config::Config;
use mini_resp::{Context, Reply};

use clap::Parser;
use std::io::{self, BufRead};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "mini-resp-cli",
    version,
    author,
    about = "向 Redis 兼容的服务器发送命令"
)]
struct Cli {
    /// TOML 配置文件，命令行参数优先
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(name = "hostname", short = 'H', long)]
    host: Option<String>,

    #[clap(short, long)]
    port: Option<u16>,

    /// 通过 unix 域套接字连接
    #[clap(short, long)]
    socket: Option<PathBuf>,

    /// 读写超时（毫秒）
    #[clap(short, long, value_parser = duration_from_ms_str)]
    timeout: Option<Duration>,

    /// 每条命令重复发送的次数
    #[clap(short = 'r', long, default_value_t = 1)]
    repeat: u64,

    /// 要发送的命令；为空时从标准输入逐行读取
    args: Vec<String>,
}

/// CLI 工具的入口点。
///
/// 连接是阻塞模式的。从标准输入读取时，所有命令先追加到输出缓冲区再依次读取回复，即流水线发送。
fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 解析命令行参数
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // 启用日志记录，`RUST_LOG` 优先于配置文件
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()?;

    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(socket) = cli.socket {
        config.connection.unix_socket = Some(socket);
    }

    let mut options = config.to_options();
    // 这个工具只使用阻塞模式
    options.nonblocking = false;
    if cli.timeout.is_some() {
        options.command_timeout = cli.timeout;
    }

    let mut ctx = Context::connect_with_options(&options)?;

    if let Some(interval) = config.keepalive() {
        ctx.enable_keepalive_with_interval(interval)?;
    }

    ctx.set_push_handler(|reply: Reply| println!("(push) {}", reply));

    let commands = if cli.args.is_empty() {
        read_commands(io::stdin().lock())?
    } else {
        vec![cli.args]
    };

    let mut pending = 0;
    for argv in commands.iter().filter(|argv| !argv.is_empty()) {
        for _ in 0..cli.repeat {
            ctx.append_command_argv(argv, None)?;
            pending += 1;
        }
    }

    for _ in 0..pending {
        if let Some(reply) = ctx.get_reply()? {
            println!("{}", reply);
        }
    }

    Ok(())
}

/// 每行一条命令，参数按空白分隔
fn read_commands(input: impl BufRead) -> io::Result<Vec<Vec<String>>> {
    input
        .lines()
        .map(|line| Ok(line?.split_whitespace().map(str::to_string).collect()))
        .collect()
}

fn duration_from_ms_str(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}
