//! 批量验证去脸结果.
//!
//! 对 `--defaced` 下的每个受试者, 将 `--raw` 下对应的原始 DICOM 序列转换为 nii,
//! 用 nnU-Net 预测应当移除的区域, 再与去脸工具的结果比较, 给出 PASS/FAIL.
//!
//! 日志级别默认为 `info`, 可以通过 `RUST_LOG` 或 `--verbose` 调整.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use utils::loader;

mod result;
mod runner;

/// 去脸结果的批量验证.
#[derive(Debug, Parser)]
#[command(name = "deface-verify", version, about)]
pub struct Args {
    /// 去脸结果根目录, 每个受试者一个子目录.
    #[arg(short, long)]
    pub defaced: PathBuf,

    /// 原始 DICOM 根目录, 每个受试者一个子目录.
    #[arg(short, long)]
    pub raw: PathBuf,

    /// 文本报告路径.
    #[arg(short, long, default_value = "deface_verification.txt")]
    pub output: PathBuf,

    /// JSON 报告路径.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// 只验证这些受试者.
    #[arg(long, num_args = 1..)]
    pub subjects: Vec<String>,

    /// GPU 编号.
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,

    /// nnU-Net 训练结果根目录. 默认为 `$nnUNet_results` 或 `$HOME/nnUNet`.
    #[arg(long)]
    pub model_root: Option<PathBuf>,

    /// 同时验证的受试者数.
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// 外部进程的超时, 秒.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 输出调试日志.
    #[arg(short, long)]
    pub verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// 实际运行. 返回是否每个受试者都得到了指标.
fn run(args: &Args) -> anyhow::Result<bool> {
    if !args.defaced.is_dir() {
        bail!("defaced root {} is not a directory", args.defaced.display());
    }
    if !args.raw.is_dir() {
        bail!("raw root {} is not a directory", args.raw.display());
    }

    let subjects = loader::discover_subjects(&args.defaced, &args.subjects);
    if subjects.is_empty() {
        bail!("no subject with `{}` under {}", loader::DEFACED_FILE, args.defaced.display());
    }
    tracing::info!("Found {} subject(s)", subjects.len());

    let runner = runner::Runner::from_args(args);
    let batch = runner.run(&subjects, args.jobs)?;

    batch.analyze()?;
    batch
        .write_report(&args.output)
        .with_context(|| format!("cannot write report to {}", args.output.display()))?;
    tracing::info!("Report written to {}", args.output.display());

    if let Some(path) = &args.json {
        cfg_if::cfg_if! {
            if #[cfg(feature = "serde")] {
                batch
                    .write_json(path)
                    .with_context(|| format!("cannot write JSON report to {}", path.display()))?;
                tracing::info!("JSON report written to {}", path.display());
            } else {
                tracing::warn!("Built without `serde`, JSON report {} skipped", path.display());
            }
        }
    }

    Ok(batch.all_verified())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
