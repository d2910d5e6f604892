use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::GalleryOptions;
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ResetCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
    /// 确认清空，远程的特征缓存也会被覆盖为空
    #[arg(long)]
    pub yes: bool,
}

impl SubCommandExtend for ResetCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if !self.yes {
            bail!("该操作会清空本地图片和特征缓存，请加上 --yes 确认");
        }
        let db = self.gallery.open(&opts.conf_dir, None).await?;
        info!("清空图库中……");
        db.reset().await?;
        info!("清空完成");
        Ok(())
    }
}
