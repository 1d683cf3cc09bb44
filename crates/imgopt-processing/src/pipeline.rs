use anyhow::Context;
use imgopt_db::BatchLease;

use crate::extract::extract_urls;
use crate::runner::run_items;
use crate::spreadsheet::{CellValue, SpreadsheetError, Workbook};
use crate::traits::ItemProcessor;

#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every item was handled; `output` is the rewritten workbook.
    Finished {
        output: Vec<u8>,
        converted: usize,
        failed: u64,
    },
    /// The batch was cancelled; no output was produced.
    Cancelled,
}

/// Process one uploaded workbook end to end.
///
/// Only the first worksheet is scanned and rewritten; other sheets are copied.
/// The item count is recorded on the batch before the first image is fetched.
pub async fn process_workbook<P>(
    processor: &P,
    lease: &BatchLease,
    input: Vec<u8>,
) -> anyhow::Result<PipelineOutcome>
where
    P: ItemProcessor + ?Sized,
{
    let mut workbook = tokio::task::spawn_blocking(move || Workbook::from_xlsx_bytes(&input))
        .await
        .context("Workbook parsing task failed")??;

    let items = {
        let sheet = workbook.first_sheet().ok_or(SpreadsheetError::NoWorksheet)?;
        extract_urls(sheet, lease.mode())
    };
    lease.set_total(items.len() as u64).await?;

    tracing::info!(
        batch_id = %lease.batch_id(),
        mode = %lease.mode(),
        items = items.len(),
        threads = lease.threads(),
        "Processing workbook"
    );

    if lease.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled);
    }

    let summary = run_items(processor, lease, items).await;
    if summary.cancelled {
        return Ok(PipelineOutcome::Cancelled);
    }

    let converted = summary.replacements.len();
    let sheet = workbook
        .first_sheet_mut()
        .ok_or(SpreadsheetError::NoWorksheet)?;
    for (cell, new_url) in summary.replacements {
        sheet.set(cell.row, cell.col, CellValue::Text(new_url));
    }

    let output = tokio::task::spawn_blocking(move || workbook.to_xlsx_bytes())
        .await
        .context("Workbook writing task failed")??;

    Ok(PipelineOutcome::Finished {
        output,
        converted,
        failed: summary.failed,
    })
}
