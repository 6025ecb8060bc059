use std::io::Write;

fn build_logger(default_level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let module = record.module_path().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {level}: {}{level_style:#} {grey_style}({module}){grey_style:#}",
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env();
    builder
}

/// 初始化全局日志。RUST_LOG 可以覆盖默认的 Info 级别。
///
/// 进程内只能调用一次，重复调用会 panic（env_logger 的行为）。
pub fn init_log() {
    build_logger(log::LevelFilter::Info).init();
}

/// 测试用的初始化：可以被多个测试重复调用，后续调用是 no-op。
pub fn init_log_for_tests() {
    let _ = build_logger(log::LevelFilter::Debug).is_test(true).try_init();
}
