use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_report(conn: &Connection, report: &Report) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reports (report_id, patient_id, report_type, report_date, title)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            report.id,
            report.patient_id,
            report.report_type.as_str(),
            report.report_date.map(|d| d.to_string()),
            report.title,
        ],
    )?;
    Ok(())
}

pub fn get_report(conn: &Connection, report_id: i64) -> Result<Option<Report>, DatabaseError> {
    let result = conn.query_row(
        "SELECT report_id, patient_id, report_type, report_date, title
         FROM reports WHERE report_id = ?1",
        params![report_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    );

    match result {
        Ok((id, patient_id, report_type, report_date, title)) => Ok(Some(Report {
            id,
            patient_id,
            report_type: ReportType::from_label(&report_type),
            report_date: report_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            title,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_fragment(conn: &Connection, fragment: &Fragment) -> Result<(), DatabaseError> {
    let embedding = if fragment.embedding.is_empty() {
        None
    } else {
        Some(embedding_to_blob(&fragment.embedding))
    };
    conn.execute(
        "INSERT INTO report_chunks (chunk_id, report_id, chunk_index, page, char_offset,
         chunk_text, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fragment.id,
            fragment.report_id,
            fragment.fragment_index,
            fragment.page,
            fragment.offset,
            fragment.text,
            embedding,
        ],
    )?;
    Ok(())
}

struct FragmentRow {
    id: i64,
    report_id: i64,
    report_type: String,
    fragment_index: u32,
    page: Option<u32>,
    offset: Option<u32>,
    text: String,
    embedding: Option<Vec<u8>>,
}

/// All fragments for a patient, ordered by report id then chunk index.
pub fn get_fragments_for_patient(
    conn: &Connection,
    patient_id: i64,
) -> Result<Vec<Fragment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT c.chunk_id, c.report_id, r.report_type, c.chunk_index, c.page, c.char_offset,
         c.chunk_text, c.embedding
         FROM report_chunks c
         JOIN reports r ON r.report_id = c.report_id
         WHERE r.patient_id = ?1
         ORDER BY c.report_id ASC, c.chunk_index ASC",
    )?;

    let rows = stmt.query_map(params![patient_id], |row| {
        Ok(FragmentRow {
            id: row.get(0)?,
            report_id: row.get(1)?,
            report_type: row.get(2)?,
            fragment_index: row.get(3)?,
            page: row.get(4)?,
            offset: row.get(5)?,
            text: row.get(6)?,
            embedding: row.get(7)?,
        })
    })?;

    let mut fragments = Vec::new();
    for row in rows {
        fragments.push(fragment_from_row(row?));
    }
    Ok(fragments)
}

/// A malformed embedding blob costs that chunk its similarity signal, not
/// the whole patient read.
fn fragment_from_row(row: FragmentRow) -> Fragment {
    let embedding = match row.embedding {
        Some(blob) => blob_to_embedding(&blob).unwrap_or_else(|| {
            tracing::warn!(
                chunk_id = row.id,
                bytes = blob.len(),
                "Malformed embedding blob; chunk ranks without similarity"
            );
            Vec::new()
        }),
        None => Vec::new(),
    };
    Fragment {
        id: row.id,
        report_id: row.report_id,
        report_type: ReportType::from_label(&row.report_type),
        fragment_index: row.fragment_index,
        page: row.page,
        offset: row.offset,
        text: row.text,
        embedding,
    }
}

/// Encode an embedding as little-endian `f32` bytes.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` blob. `None` if the length is not a multiple of 4.
pub fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn seed_report(conn: &Connection, id: i64, patient_id: i64, report_type: ReportType) {
        insert_report(
            conn,
            &Report {
                id,
                patient_id,
                report_type,
                report_date: NaiveDate::from_ymd_opt(2024, 3, 1),
                title: Some(format!("Report {id}")),
            },
        )
        .unwrap();
    }

    fn fragment(id: i64, report_id: i64, index: u32, text: &str) -> Fragment {
        Fragment {
            id,
            report_id,
            report_type: ReportType::Radiology,
            fragment_index: index,
            page: Some(1),
            offset: Some(index * 100),
            text: text.into(),
            embedding: vec![0.5, -1.25, 3.0],
        }
    }

    #[test]
    fn embedding_blob_round_trip() {
        let v = vec![0.1_f32, -2.5, 1e-7];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)).unwrap(), v);
        assert!(blob_to_embedding(&[0, 1, 2]).is_none());
    }

    #[test]
    fn report_insert_and_get() {
        let conn = open_memory_database().unwrap();
        seed_report(&conn, 7, 1, ReportType::Pathology);
        let report = get_report(&conn, 7).unwrap().unwrap();
        assert_eq!(report.report_type, ReportType::Pathology);
        assert_eq!(report.report_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert!(get_report(&conn, 99).unwrap().is_none());
    }

    #[test]
    fn fragments_ordered_by_report_then_index() {
        let conn = open_memory_database().unwrap();
        seed_report(&conn, 2, 1, ReportType::Radiology);
        seed_report(&conn, 1, 1, ReportType::Pathology);
        seed_report(&conn, 3, 9, ReportType::Radiology);

        insert_fragment(&conn, &fragment(10, 2, 1, "b1")).unwrap();
        insert_fragment(&conn, &fragment(11, 2, 0, "b0")).unwrap();
        insert_fragment(&conn, &fragment(12, 1, 0, "a0")).unwrap();
        insert_fragment(&conn, &fragment(13, 3, 0, "other patient")).unwrap();

        let fragments = get_fragments_for_patient(&conn, 1).unwrap();
        let texts: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "b0", "b1"]);
        assert_eq!(fragments[0].report_type, ReportType::Pathology);
        assert_eq!(fragments[1].embedding, vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn unknown_patient_has_no_fragments() {
        let conn = open_memory_database().unwrap();
        assert!(get_fragments_for_patient(&conn, 42).unwrap().is_empty());
    }

    #[test]
    fn missing_embedding_reads_as_empty() {
        let conn = open_memory_database().unwrap();
        seed_report(&conn, 1, 1, ReportType::Radiology);
        let mut f = fragment(1, 1, 0, "no vector");
        f.embedding.clear();
        insert_fragment(&conn, &f).unwrap();
        let fragments = get_fragments_for_patient(&conn, 1).unwrap();
        assert!(fragments[0].embedding.is_empty());
    }

    #[test]
    fn malformed_embedding_blob_reads_as_empty() {
        let conn = open_memory_database().unwrap();
        seed_report(&conn, 1, 1, ReportType::Radiology);
        insert_fragment(&conn, &fragment(1, 1, 0, "good vector")).unwrap();
        insert_fragment(&conn, &fragment(2, 1, 1, "bad vector")).unwrap();
        conn.execute(
            "UPDATE report_chunks SET embedding = ?1 WHERE chunk_id = 2",
            params![vec![0u8, 1, 2]],
        )
        .unwrap();

        let fragments = get_fragments_for_patient(&conn, 1).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].embedding, vec![0.5, -1.25, 3.0]);
        assert!(fragments[1].embedding.is_empty());
    }

    #[test]
    fn report_type_labels_read_leniently() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO reports (report_id, patient_id, report_type)
             VALUES (9, 1, 'CT Scan Report')",
            [],
        )
        .unwrap();
        insert_fragment(&conn, &fragment(1, 9, 0, "imaging text")).unwrap();

        let report = get_report(&conn, 9).unwrap().unwrap();
        assert_eq!(report.report_type, ReportType::Radiology);
        let fragments = get_fragments_for_patient(&conn, 1).unwrap();
        assert_eq!(fragments[0].report_type, report.report_type);
    }
}
