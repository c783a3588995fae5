mod pretty_list;

use {
    anyhow::Result,
    flexi_logger::{DeferredNow, Logger, LoggerHandle, Record},
    std::fmt::Write as FmtWrite,
    textwrap::{termwidth, Options},
};

pub use self::pretty_list::PrettyList;

/// Start console logging.
///
/// The level comes from RUST_LOG and defaults to info. Keep the returned
/// handle alive for as long as log output is wanted.
pub fn setup() -> Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str("info")?
        .format(multiline_format)
        .start()?;
    log::info!("Adjust the log level by setting RUST_LOG, the default is info");
    Ok(handle)
}

/// A flexi_logger format function which wraps each record to the terminal
/// width, marking continuation lines so multiline records stay readable.
pub fn multiline_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let size = termwidth().min(80);
    let wrap_options = Options::new(size)
        .initial_indent("┏ ")
        .subsequent_indent("┃ ");

    let mut full_line = String::new();
    writeln!(
        full_line,
        "{} [{}] [{}] [{}:{}]",
        record.level(),
        now.now().format("%H:%M:%S%.6f"),
        std::thread::current().name().unwrap_or("<unnamed thread>"),
        record.file().unwrap_or("<unnamed>"),
        record.line().unwrap_or(0),
    )
    .expect("unable to format the log header");

    write!(&mut full_line, "{}", &record.args())
        .expect("unable to format the log record");

    writeln!(w, "{}", textwrap::fill(&full_line, wrap_options))
}
