use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::{GalleryOptions, MatchOptions, Opts};
use crate::matcher::MatchResult;

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 待匹配的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for MatchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let probe = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("无法读取图片 {}", self.image.display()))?;
        let db = self.gallery.open(&opts.conf_dir, Some(&self.matching)).await?;
        let name = self.image.file_name().and_then(|s| s.to_str());
        let result = db.match_probe(&probe, name).await?;
        print_result(&result, self.output_format)
    }
}

fn print_result(result: &MatchResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            let distance = result.distance.map(|d| format!("{d:.4}")).unwrap_or_else(|| "-".to_string());
            let matched = result.matched_with.as_deref().unwrap_or("-");
            println!("{}\t{}\t{}", result.is_match, distance, matched);
            if result.degraded {
                println!("(同步失败，结果基于本地缓存)");
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
