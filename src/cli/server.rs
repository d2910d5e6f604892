use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};

use crate::cli::SubCommandExtend;
use crate::config::{GalleryOptions, MatchOptions};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 监听地址
    #[arg(long, env = "FACESYNC_ADDR", default_value = "127.0.0.1:5000")]
    pub addr: String,
    /// 手动同步接口的验证 token，不填则随机生成
    #[arg(long, env = "FACESYNC_TOKEN", default_value_t = String::new())]
    pub token: String,
    /// 定时同步间隔（秒），不填则只在匹配前同步
    #[arg(long, value_name = "SECONDS")]
    pub sync_interval: Option<u64>,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = self.gallery.open(&opts.conf_dir, Some(&self.matching)).await?;

        let token = if self.token.is_empty() {
            let token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {token}");
            token
        } else {
            self.token.clone()
        };

        // 创建应用状态
        let state = server::AppState::new(db, token);

        // 启动时在后台先同步一次，不阻塞服务
        let initial = state.clone();
        tokio::spawn(async move {
            if let Err(e) = initial.db.sync().await {
                warn!("启动同步失败: {e}");
            }
        });

        if let Some(secs) = self.sync_interval.filter(|&secs| secs > 0) {
            let periodic = state.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(secs));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // 第一次 tick 立即返回，跳过以免与启动同步重复
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = periodic.db.sync().await {
                        warn!("定时同步失败: {e}");
                    }
                }
            });
        }

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            spawn_metrics_pusher(url, instance, self.prometheus_auth.as_deref())?;
        }

        // 创建应用
        let app = server::create_app(Arc::clone(&state));

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

fn spawn_metrics_pusher(url: String, instance: String, auth: Option<&str>) -> anyhow::Result<()> {
    let auth = match auth {
        Some(s) => {
            let (username, password) =
                s.split_once(':').ok_or_else(|| anyhow!("prometheus 认证信息格式应为 username:password"))?;
            Some((username.to_string(), password.to_string()))
        }
        None => None,
    };
    tokio::spawn(async move {
        loop {
            let metric_families = prometheus::gather();
            let url = url.clone();
            let instance = instance.clone();
            let auth = auth.clone();
            let r = spawn_blocking(move || {
                prometheus::push_metrics(
                    "facesync",
                    labels! {
                        "instance".to_string() => instance,
                    },
                    &url,
                    metric_families,
                    auth.map(|(username, password)| BasicAuthentication { username, password }),
                )
            })
            .await;
            match r {
                Ok(Err(e)) => error!("推送指标失败: {e}"),
                Err(e) => error!("推送指标任务异常: {e}"),
                Ok(Ok(())) => {}
            }
            sleep(Duration::from_secs(30)).await;
        }
    });
    Ok(())
}
