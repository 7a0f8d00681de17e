//! 程序运行函数.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use mr_berry::model::FittedModel;
use mr_berry::pipeline::{run_batch, BatchReport, PipelineConfig};
use utils::loader;

use crate::Cli;

/// 由命令行参数组装后处理配置.
fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::open(path)
            .with_context(|| format!("loading config `{}`", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(d) = cli.maximum_distance {
        config.maximum_distance = d;
    }
    if cli.no_render {
        config.render = false;
    }
    config.validate()?;
    Ok(config)
}

/// 实际运行.
pub fn run(cli: &Cli) -> Result<BatchReport> {
    let data_dir = match &cli.data_dir {
        Some(d) => d.clone(),
        None => loader::data_dir_from_env_or_home().context("cannot determine dataset directory")?,
    };
    let patients = loader::patients(&data_dir)
        .with_context(|| format!("listing patients under `{}`", data_dir.display()))?;
    log::info!("{} patients under `{}`", patients.len(), data_dir.display());

    let model = FittedModel::open(&cli.model)
        .with_context(|| format!("loading model `{}`", cli.model.display()))?;
    let config = pipeline_config(cli)?;
    log::debug!("{config:?}");

    let cancel = Arc::new(AtomicBool::new(false));
    if let Some(secs) = cli.time_limit {
        let cancel = Arc::clone(&cancel);
        // 守护线程, 随主线程退出.
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            log::warn!("time limit reached, remaining patients will be skipped");
            cancel.store(true, Ordering::Relaxed);
        });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs.unwrap_or_else(utils::cpus))
        .build()?;
    Ok(pool.install(|| run_batch(&patients, &model, &config, &cancel)))
}
