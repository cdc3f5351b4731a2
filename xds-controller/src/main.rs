#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use envoy_xds_controller_runtime::{Args, ValidateArgs};

fn main() -> anyhow::Result<()> {
    // `validate` runs offline, without a cluster client or an async runtime.
    if std::env::args().nth(1).as_deref() == Some("validate") {
        std::process::exit(ValidateArgs::parse_and_run(std::env::args().skip(1)));
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(Args::parse_and_run())
}
