use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lecture_uploader::{
    api::CompleteUploadResponse, logging, AppConfig, ChannelObserver, FileHandle, HttpTransport,
    UploadCoordinator, UploadEvent, UploadTarget,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "lecture-uploader", version, about = "课程视频上传客户端")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = "config/app.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 上传课程视频
    Upload {
        file: PathBuf,
        #[arg(long = "course")]
        course_id: u64,
        #[arg(long = "lecture")]
        lecture_id: u64,
        /// 以 JSON 行输出上传事件
        #[arg(long)]
        json: bool,
    },
    /// 查询分片上传会话状态
    Status { upload_id: String },
    /// 中止分片上传会话
    Abort { upload_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config).await;
    let _log_guard = logging::init_logging(&config.log);
    info!("使用后端: {}", config.api.base_url);

    let transport = Arc::new(
        HttpTransport::new(&config.api, config.api.token_provider())
            .context("创建上传客户端失败")?,
    );
    let coordinator = UploadCoordinator::new(transport, config.upload.clone());

    match cli.command {
        Command::Upload {
            file,
            course_id,
            lecture_id,
            json,
        } => upload(coordinator, file, UploadTarget::new(course_id, lecture_id), json).await,
        Command::Status { upload_id } => {
            let status = coordinator
                .status_client()
                .get_status(&upload_id)
                .await
                .context("查询上传状态失败")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Abort { upload_id } => {
            let resp = coordinator
                .status_client()
                .abort(&upload_id)
                .await
                .context("中止上传失败")?;
            println!("{}", resp.message);
            Ok(())
        }
    }
}

async fn upload(
    coordinator: UploadCoordinator,
    path: PathBuf,
    target: UploadTarget,
    json: bool,
) -> Result<()> {
    let file = FileHandle::open(&path)
        .await
        .with_context(|| format!("无法打开文件: {}", path.display()))?;

    let (observer, mut events) = ChannelObserver::new();
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .upload_with_token(file, target, Arc::new(observer), cancel)
                .await
        })
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, json)?;
                if event.is_final() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                eprintln!("正在取消上传...");
                cancel.cancel();
            }
        }
    }

    let body = task.await.context("上传任务异常退出")??;
    if !json {
        match serde_json::from_value::<CompleteUploadResponse>(body) {
            Ok(CompleteUploadResponse {
                video_url: Some(url),
                ..
            }) => println!("视频地址: {}", url),
            _ => println!("上传完成"),
        }
    }
    Ok(())
}

fn print_event(event: &UploadEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        UploadEvent::Progress { percent } => println!("进度: {}%", percent),
        UploadEvent::State { state } => info!("状态: {:?}", state),
        UploadEvent::Failed { failure } if failure.is_cancelled() => println!("上传已取消"),
        UploadEvent::Failed { failure } => {
            println!("上传失败: {}", failure.message);
            if let Some(id) = &failure.upload_id {
                println!("可执行 `lecture-uploader abort {}` 释放已上传的分片", id);
            }
        }
        UploadEvent::Succeeded { .. } => {}
    }
    Ok(())
}
