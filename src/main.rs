// ==========================================
// 模压质量拒收分析 - 命令行入口
// ==========================================
// 用法:
//   rejection-analysis [db_path] [from] [to]   从数据库汇总（日期 YYYY-MM-DD，默认最近 30 天）
//   rejection-analysis --csv <file>            从导出 CSV 汇总
// 输出: 层级汇总报表 JSON（stdout），日志写 stderr
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use std::path::PathBuf;

use rejection_analysis::app::{get_default_db_path, AppState};
use rejection_analysis::domain::rollup::RollupReport;
use rejection_analysis::engine::RejectionRollupEngine;
use rejection_analysis::importer::{CsvRecordSource, RecordSource};
use rejection_analysis::logging;
use rejection_analysis::repository::InspectionFilter;

/// 未指定起始日期时回溯的天数
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

enum Command {
    Database {
        db_path: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    Csv(PathBuf),
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("日期格式错误（期望 YYYY-MM-DD）: {}", raw))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let first = args.next();
    if first.as_deref() == Some("--csv") {
        let path = args.next().ok_or_else(|| anyhow!("--csv 需要文件路径"))?;
        return Ok(Command::Csv(PathBuf::from(path)));
    }

    let db_path = first
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);
    let today = Local::now().date_naive();
    let from = match args.next() {
        Some(raw) => parse_date(&raw)?,
        None => today - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };
    let to = match args.next() {
        Some(raw) => parse_date(&raw)?,
        None => today,
    };
    if from > to {
        bail!("起始日期晚于结束日期: {} > {}", from, to);
    }
    Ok(Command::Database { db_path, from, to })
}

async fn run(command: Command) -> Result<RollupReport> {
    match command {
        Command::Csv(path) => {
            let records = CsvRecordSource::new()
                .read_records(&path)
                .with_context(|| format!("读取 CSV 失败: {}", path.display()))?;
            Ok(RejectionRollupEngine::new().aggregate(&records))
        }
        Command::Database { db_path, from, to } => {
            tracing::info!("使用数据库: {}", db_path);
            let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;
            let report = state
                .report_api
                .get_rejection_rollup(&InspectionFilter::between(from, to), true)
                .await?;
            Ok(report)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", rejection_analysis::APP_NAME, rejection_analysis::VERSION);
    tracing::info!("==================================================");

    let command = parse_args(std::env::args().skip(1))?;
    let report = run(command).await?;

    tracing::info!(
        products = report.summary.total_products,
        rows = report.rows.len(),
        "汇总完成"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
