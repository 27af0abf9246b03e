use std::str::FromStr;

use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

/// Append a summary and its citations in one transaction. Returns the new row id.
pub fn insert_summary(
    conn: &Connection,
    patient_id: i64,
    summary: &Summary,
) -> Result<i64, DatabaseError> {
    let body = summary.to_json().map_err(|e| DatabaseError::Corrupt {
        table: "summaries".into(),
        reason: e.to_string(),
    })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO summaries (patient_id, specialty, generated_at, summary_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            patient_id,
            summary.specialty.as_str(),
            summary.generated_at.to_rfc3339(),
            body,
        ],
    )?;
    let summary_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO summary_citations (summary_id, fragment_id, report_id, report_type,
             page, fragment_index, provenance, preview_text, full_text, section_tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for c in &summary.citations {
            let tags = serde_json::to_string(&c.section_tags).map_err(|e| {
                DatabaseError::Corrupt {
                    table: "summary_citations".into(),
                    reason: e.to_string(),
                }
            })?;
            stmt.execute(params![
                summary_id,
                c.fragment_id,
                c.report_id,
                c.report_type.as_str(),
                c.page,
                c.fragment_index,
                c.provenance.as_str(),
                c.preview_text,
                c.full_text,
                tags,
            ])?;
        }
    }

    tx.commit()?;
    Ok(summary_id)
}

/// The newest summary for a patient, with its citations, or `None`.
pub fn get_latest_summary(
    conn: &Connection,
    patient_id: i64,
) -> Result<Option<Summary>, DatabaseError> {
    let result = conn.query_row(
        "SELECT summary_id, summary_json FROM summaries
         WHERE patient_id = ?1 ORDER BY summary_id DESC LIMIT 1",
        params![patient_id],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    );

    let (summary_id, body) = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut summary = Summary::from_json(&body).map_err(|e| DatabaseError::Corrupt {
        table: "summaries".into(),
        reason: format!("summary {summary_id}: {e}"),
    })?;
    summary.citations = get_citations(conn, summary_id)?;
    Ok(Some(summary))
}

/// Number of summaries persisted for a patient (history is retained).
pub fn count_summaries(conn: &Connection, patient_id: i64) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM summaries WHERE patient_id = ?1",
        params![patient_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

struct CitationRow {
    fragment_id: i64,
    report_id: i64,
    report_type: String,
    page: Option<u32>,
    fragment_index: u32,
    provenance: String,
    preview_text: String,
    full_text: String,
    section_tags: String,
}

pub fn get_citations(conn: &Connection, summary_id: i64) -> Result<Vec<Citation>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT fragment_id, report_id, report_type, page, fragment_index, provenance,
         preview_text, full_text, section_tags
         FROM summary_citations WHERE summary_id = ?1
         ORDER BY report_id ASC, fragment_index ASC",
    )?;

    let rows = stmt.query_map(params![summary_id], |row| {
        Ok(CitationRow {
            fragment_id: row.get(0)?,
            report_id: row.get(1)?,
            report_type: row.get(2)?,
            page: row.get(3)?,
            fragment_index: row.get(4)?,
            provenance: row.get(5)?,
            preview_text: row.get(6)?,
            full_text: row.get(7)?,
            section_tags: row.get(8)?,
        })
    })?;

    let mut citations = Vec::new();
    for row in rows {
        citations.push(citation_from_row(row?)?);
    }
    Ok(citations)
}

fn citation_from_row(row: CitationRow) -> Result<Citation, DatabaseError> {
    let section_tags: Vec<SummarySection> =
        serde_json::from_str(&row.section_tags).map_err(|e| DatabaseError::Corrupt {
            table: "summary_citations".into(),
            reason: e.to_string(),
        })?;
    Ok(Citation {
        fragment_id: row.fragment_id,
        report_id: row.report_id,
        report_type: ReportType::from_str(&row.report_type)?,
        page: row.page,
        fragment_index: row.fragment_index,
        provenance: Provenance::from_str(&row.provenance)?,
        preview_text: row.preview_text,
        full_text: row.full_text,
        section_tags,
    })
}
