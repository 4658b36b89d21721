//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use adaptive_dl_core::Mode;
use clap::Parser;

/// Run an adaptive batch download against a base URL.
///
/// Fetches `count` objects named `img_001.jpg .. img_{count:03}.jpg` under
/// `base-url`, optionally migrating from the default link to a secondary one
/// when the weak-link detector trips during the batch.
#[derive(Parser, Debug)]
#[command(name = "adaptive-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Base URL objects are fetched under (trailing slash is stripped).
    pub base_url: String,

    /// Number of objects to fetch.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: u32,

    /// Migration mode: `wifi_only` stays on the default link; `auto_switch`
    /// drives the staged migration protocol on a weak verdict.
    #[arg(short, long, default_value = "wifi_only")]
    pub mode: Mode,

    /// Directory transfers are written into.
    #[arg(short, long, default_value = "./downloads")]
    pub out_dir: PathBuf,

    /// Probe cadence: issue a 1-byte Range GET every N transfers.
    #[arg(long, default_value_t = 10)]
    pub probe_every_n: u32,

    /// Write the JSON batch report to this path instead of stdout.
    #[arg(long)]
    pub report_out: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_successfully() {
        let args = Args::try_parse_from(["adaptive-dl", "https://example.com/images"]).unwrap();
        assert_eq!(args.base_url, "https://example.com/images");
        assert_eq!(args.count, 10);
        assert_eq!(args.mode, Mode::WifiOnly);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn verbose_flag_increments_count() {
        let args = Args::try_parse_from(["adaptive-dl", "https://x", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn mode_flag_parses_auto_switch() {
        let args =
            Args::try_parse_from(["adaptive-dl", "https://x", "--mode", "auto_switch"]).unwrap();
        assert_eq!(args.mode, Mode::AutoSwitch);
    }

    #[test]
    fn missing_base_url_is_an_error() {
        let result = Args::try_parse_from(["adaptive-dl"]);
        assert!(result.is_err());
    }

    #[test]
    fn count_flag_overrides_default() {
        let args = Args::try_parse_from(["adaptive-dl", "https://x", "-n", "42"]).unwrap();
        assert_eq!(args.count, 42);
    }
}
