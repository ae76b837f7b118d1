use anyhow::Result;
use clap::{Arg, Command};
use conductor::common::{start_application, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("conductor-differ")
        .version("1.0.0")
        .about("Conductor - 制品差异服务")
        .long_about("启动制品差异守护进程的服务面；差异计算由外部协作方承担")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认位置查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned().unwrap_or_default(),
        log_format: matches.get_one::<String>("log-format").cloned().unwrap_or_default(),
        worker_id: None,
    };

    start_application(startup_config, "differ", "Differ").await
}
