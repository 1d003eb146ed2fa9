//! carma-node: loads a node's CARMA config directory, derives its
//! neighbor sets, and prepares bootstrap directories for new nodes.
//!
//! ```text
//! carma-node                               validate and log rx/tx
//! carma-node epoch <nonce-hex>             start a new epoch
//! carma-node bootstrap <link-address>      write a bootstrap directory
//! ```

mod commands;
mod settings;

use tracing::info;

use crate::settings::NodeSettings;

fn main() -> anyhow::Result<()> {
    let settings = NodeSettings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(settings.logging.directive.parse()?),
        )
        .init();

    let config_dir = settings.config_dir();
    info!(dir = %config_dir.display(), "carma node starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["check"] => {
            commands::check(&config_dir)?;
        }
        ["epoch", nonce] => commands::epoch(&config_dir, nonce, settings.node.pack_phonebook)?,
        ["bootstrap", link_address] => commands::bootstrap(
            &config_dir,
            &settings.bootstrap_dir(),
            &settings.bootstrap.channel_id,
            link_address,
        )?,
        other => anyhow::bail!("unrecognized arguments: {other:?}"),
    }
    Ok(())
}
