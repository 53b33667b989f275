// ==========================================
// 商品目录批量导入系统 - 命令行入口
// ==========================================
// 用法:
//   catalog-import analyze <file>
//   catalog-import import <file> [--db <path>] [--sheet <n>] [--max-rows <n>]
//                                [--auto-parents] [--dry-run]
// 说明: 列映射使用表头别名猜测结果
// ==========================================

use anyhow::{anyhow, bail, Context};
use catalog_import::db::default_db_path;
use catalog_import::{logging, ImportApi, ImportMode, ImportRequest, ImportStatus};
use std::path::PathBuf;

const USAGE: &str = "用法:
  catalog-import analyze <file>
  catalog-import import <file> [--db <path>] [--sheet <n>] [--max-rows <n>] [--auto-parents] [--dry-run]";

struct ImportArgs {
    file: PathBuf,
    db_path: String,
    sheet: usize,
    max_rows: Option<usize>,
    auto_parents: bool,
    dry_run: bool,
}

fn parse_import_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<ImportArgs> {
    let file = args.next().ok_or_else(|| anyhow!("缺少文件路径\n{}", USAGE))?;
    let mut parsed = ImportArgs {
        file: PathBuf::from(file),
        db_path: default_db_path(),
        sheet: 0,
        max_rows: None,
        auto_parents: false,
        dry_run: false,
    };

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--db" => parsed.db_path = args.next().context("--db 缺少参数")?,
            "--sheet" => {
                parsed.sheet = args.next().context("--sheet 缺少参数")?.parse()?;
            }
            "--max-rows" => {
                parsed.max_rows = Some(args.next().context("--max-rows 缺少参数")?.parse()?);
            }
            "--auto-parents" => parsed.auto_parents = true,
            "--dry-run" => parsed.dry_run = true,
            other => bail!("未知参数: {}\n{}", other, USAGE),
        }
    }
    Ok(parsed)
}

async fn run_import(args: ImportArgs) -> anyhow::Result<()> {
    let api = ImportApi::open(&args.db_path).await?;
    tracing::info!(db_path = %args.db_path, file = %args.file.display(), "开始导入");

    let headers = api.load_headers(&args.file, &[args.sheet])?;
    if headers.suggested_mapping.is_empty() {
        bail!("无法从表头推断列映射: {:?}", headers.headers);
    }

    let mode = if args.auto_parents {
        ImportMode::AutoGenerateParents
    } else {
        ImportMode::Standard
    };
    let mut request = ImportRequest::new(&args.file, headers.suggested_mapping)
        .with_sheets(vec![args.sheet])
        .with_mode(mode);
    request.max_rows = args.max_rows;

    if args.dry_run {
        let outcome = api.dry_run(request).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let id = api.submit_import(request)?;
    let status = api.wait(&id).await?;
    let record = api.get_status(&id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    if status == ImportStatus::Completed {
        if let Some(result) = api.get_result(&id)? {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Ok(())
    } else {
        bail!("导入未完成: status={}", status)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    tracing::info!(version = catalog_import::VERSION, "{}", catalog_import::APP_NAME);

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("analyze") => {
            let file = args.next().ok_or_else(|| anyhow!("缺少文件路径\n{}", USAGE))?;
            let analysis = catalog_import::importer::WorksheetAnalyzer::default()
                .analyze(std::path::Path::new(&file))?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Some("import") => run_import(parse_import_args(args)?).await,
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}
