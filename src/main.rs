//! # 图片来源解析 — 命令行入口
//!
//! 本文件仅负责参数解析、日志初始化与输出。
//! 业务逻辑分布在 `image_source` 各子模块中，详见 `lib.rs` 架构文档。

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use image_source_resolver::error::AppError;
use image_source_resolver::image_source::{
    Assignment, ChannelHost, HostCall, ImageComponent, ImageConfig, SessionOutcome, SourceValue,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// 解析一个图片来源，并把宿主回调逐行输出为 JSON。
#[derive(Debug, Parser)]
#[command(name = "image-source", version, about)]
struct Args {
    /// 图片来源：URI、相对路径、Base64、十六进制或 data URI；`-` 表示从标准输入读取
    source: String,

    /// JSON 配置文件，缺省字段使用默认值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 启用懒加载
    #[arg(long)]
    lazy: bool,

    /// 组件可见（懒加载时提升暂存来源）
    #[arg(long)]
    visible: bool,

    /// 禁止外部加载器使用缓存
    #[arg(long)]
    no_cache: bool,

    /// 应用根地址映射到的本地目录
    #[arg(long)]
    app_root_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(SessionOutcome::Failed { .. }) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("❌ {}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<SessionOutcome, AppError> {
    let config = build_config(&args)?;
    let source = read_source(&args.source)?;

    let (host, mut calls) = ChannelHost::new();
    let component = ImageComponent::with_platform_loader(config, Arc::new(host))?;
    component.set_in_viewport(args.visible).await;

    let outcome = match component.set_source(Some(SourceValue::from(source))).await {
        Assignment::Started(session) => session.wait().await,
        Assignment::Deferred => {
            log::info!("💤 来源已暂存，组件不可见（使用 --visible 开始加载）");
            SessionOutcome::Unloaded
        }
        Assignment::Unchanged | Assignment::Superseded => SessionOutcome::Cancelled,
    };

    drop(component);
    print_calls(&mut calls)?;
    log::info!("🏁 最终结果：{:?}", outcome);
    Ok(outcome)
}

fn build_config(args: &Args) -> Result<ImageConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => ImageConfig::load_from_path(path)?,
        None => ImageConfig::default(),
    };

    if args.lazy {
        config.enable_lazy_loading = true;
    }
    if args.no_cache {
        config.is_cache_enabled = false;
    }
    if let Some(dir) = &args.app_root_dir {
        if !dir.is_dir() {
            return Err(AppError::Config(format!("应用根目录不存在：{}", dir.display())));
        }
        config.app_root_dir = Some(dir.clone());
    }

    Ok(config)
}

fn read_source(source: &str) -> Result<String, AppError> {
    if source != "-" {
        return Ok(source.to_string());
    }

    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn print_calls(calls: &mut UnboundedReceiver<HostCall>) -> Result<(), AppError> {
    while let Ok(call) = calls.try_recv() {
        println!("{}", serde_json::to_string(&call)?);
    }
    Ok(())
}
