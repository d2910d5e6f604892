use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::GalleryOptions;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct SyncCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
}

impl SubCommandExtend for SyncCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = self.gallery.open(&opts.conf_dir, None).await?;
        let report = db.sync().await?;
        info!("缓存中共有 {} 条特征", db.cache().len());
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
