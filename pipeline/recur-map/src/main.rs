//! 批量后处理病人数据集: 逐体素复发概率预测, 距离衰减, 可选平滑, Otsu 标注与融合可视化.
//!
//! 用法:
//!
//! ```text
//! recur-map --model model.json
//! recur-map /data/patients --model model.json --config pipeline.json --format json
//! recur-map /data/patients --model model.json --maximum-distance 0 --no-render
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod result;
mod runner;

use result::OutputFormat;

#[derive(Parser)]
#[command(name = "recur-map")]
#[command(about = "Post-process per-voxel recurrence probabilities for every patient")]
pub struct Cli {
    /// 数据集根目录. 缺省时取 `$MR_BERRY_DATA_DIR` 或 `$HOME/dataset/patients`
    data_dir: Option<PathBuf>,

    /// 预训练模型 (JSON)
    #[arg(short, long)]
    model: PathBuf,

    /// 后处理配置 (JSON). 缺省时使用默认配置
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖配置中的最大距离 (mm). 0 表示跳过距离校正
    #[arg(long)]
    maximum_distance: Option<f64>,

    /// 不输出融合可视化
    #[arg(long)]
    no_render: bool,

    /// 并行处理的病人数. 缺省时为可用核心数
    #[arg(short, long)]
    jobs: Option<usize>,

    /// 运行时限 (秒). 超时后尚未开始的病人被跳过
    #[arg(long)]
    time_limit: Option<u64>,

    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()?;

    let report = runner::run(&cli)?;
    result::print_report(&report, cli.format)?;

    if report.has_fatal() {
        anyhow::bail!("{} patient(s) failed", report.failed);
    }
    Ok(())
}
