// ==========================================
// 商品目录批量导入系统 - 导入进度仓储
// ==========================================
// 职责: import_progress 状态机持久化 + import_payload 外置结果
// 约定: 状态转换一律使用条件 UPDATE（WHERE status IN ...），
//       返回是否生效，避免并发下覆盖终态
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::progress::ProgressRecord;
use crate::domain::types::ImportStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// 终态写入参数
#[derive(Debug, Clone)]
pub struct FinishUpdate {
    pub status: ImportStatus,
    pub message: String,
    pub elapsed_time: f64,
    pub result_json: Option<String>,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
}

// ==========================================
// ProgressRepository
// ==========================================
pub struct ProgressRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建记录
    pub fn insert(&self, record: &ProgressRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let result_json = record
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO import_progress (
                import_id, status, progress_percent, message, elapsed_time,
                result_json, result_ref, error_message,
                created_at, updated_at, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.id,
                record.status.as_str(),
                record.progress_percent as i64,
                record.message,
                record.elapsed_time,
                result_json,
                record.result_ref,
                record.error_message,
                fmt_ts(record.created_at),
                fmt_ts(record.updated_at),
                record.started_at.map(fmt_ts),
                record.finished_at.map(fmt_ts),
            ],
        )?;
        Ok(())
    }

    /// pending → processing
    pub fn mark_processing(&self, id: &str, now: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_progress
            SET status = 'processing', message = '执行中', started_at = ?1, updated_at = ?1
            WHERE import_id = ?2 AND status = 'pending'
            "#,
            params![fmt_ts(now), id],
        )?;
        Ok(affected > 0)
    }

    /// 进度更新（仅 processing 状态生效）
    pub fn update_progress(
        &self,
        id: &str,
        percent: u8,
        message: &str,
        elapsed_time: f64,
        now: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_progress
            SET progress_percent = ?1, message = ?2, elapsed_time = ?3, updated_at = ?4
            WHERE import_id = ?5 AND status = 'processing'
            "#,
            params![percent.min(100) as i64, message, elapsed_time, fmt_ts(now), id],
        )?;
        Ok(affected > 0)
    }

    /// processing → completed / failed
    pub fn finish(&self, id: &str, update: &FinishUpdate, now: NaiveDateTime) -> RepositoryResult<bool> {
        if !ImportStatus::Processing.can_transition_to(update.status) {
            return Err(RepositoryError::InvalidStateTransition {
                from: ImportStatus::Processing.to_string(),
                to: update.status.to_string(),
            });
        }
        let percent: i64 = if update.status == ImportStatus::Completed { 100 } else { 0 };

        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_progress
            SET status = ?1,
                progress_percent = CASE WHEN ?2 = 100 THEN 100 ELSE progress_percent END,
                message = ?3, elapsed_time = ?4, result_json = ?5, result_ref = ?6,
                error_message = ?7, updated_at = ?8, finished_at = ?8
            WHERE import_id = ?9 AND status = 'processing'
            "#,
            params![
                update.status.as_str(),
                percent,
                update.message,
                update.elapsed_time,
                update.result_json,
                update.result_ref,
                update.error_message,
                fmt_ts(now),
                id,
            ],
        )?;
        Ok(affected > 0)
    }

    /// pending / processing → cancelled
    pub fn cancel(&self, id: &str, now: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_progress
            SET status = 'cancelled', message = '已取消', updated_at = ?1, finished_at = ?1
            WHERE import_id = ?2 AND status IN ('pending', 'processing')
            "#,
            params![fmt_ts(now), id],
        )?;
        Ok(affected > 0)
    }

    pub fn find(&self, id: &str) -> RepositoryResult<Option<ProgressRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                r#"
                SELECT import_id, status, progress_percent, message, elapsed_time,
                       result_json, result_ref, error_message,
                       created_at, updated_at, started_at, finished_at
                FROM import_progress WHERE import_id = ?1
                "#,
                params![id],
                map_progress_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 仅查询状态（取消检查点使用）
    pub fn find_status(&self, id: &str) -> RepositoryResult<Option<ImportStatus>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM import_progress WHERE import_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(ImportStatus::parse))
    }

    // ===== 外置结果 =====

    pub fn store_payload(
        &self,
        payload_key: &str,
        import_id: &str,
        payload: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_payload (payload_key, import_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(payload_key) DO UPDATE SET payload = ?3, created_at = ?4
            "#,
            params![payload_key, import_id, payload, fmt_ts(now)],
        )?;
        Ok(())
    }

    pub fn load_payload(&self, payload_key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM import_payload WHERE payload_key = ?1",
                params![payload_key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// 清理早于 cutoff 的记录与外置结果
    ///
    /// # 返回
    /// - (删除的进度记录数, 删除的外置结果数)
    pub fn cleanup_older_than(&self, cutoff: NaiveDateTime) -> RepositoryResult<(usize, usize)> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let cutoff = fmt_ts(cutoff);

        let payloads = tx.execute(
            r#"
            DELETE FROM import_payload
            WHERE created_at < ?1
               OR import_id IN (SELECT import_id FROM import_progress WHERE updated_at < ?1)
            "#,
            params![cutoff],
        )?;
        let records = tx.execute(
            "DELETE FROM import_progress WHERE updated_at < ?1",
            params![cutoff],
        )?;

        tx.commit()?;
        Ok((records, payloads))
    }
}

fn map_progress_row(row: &Row<'_>) -> rusqlite::Result<ProgressRecord> {
    let status_raw: String = row.get(1)?;
    let result_json: Option<String> = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let started_at: Option<String> = row.get(10)?;
    let finished_at: Option<String> = row.get(11)?;

    let fallback = NaiveDateTime::MIN;

    Ok(ProgressRecord {
        id: row.get(0)?,
        // 未知状态值按失败处理
        status: ImportStatus::parse(&status_raw).unwrap_or(ImportStatus::Failed),
        progress_percent: row.get::<_, i64>(2)?.clamp(0, 100) as u8,
        message: row.get(3)?,
        elapsed_time: row.get(4)?,
        result_data: result_json.and_then(|s| serde_json::from_str(&s).ok()),
        result_ref: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_ts(&created_at).unwrap_or(fallback),
        updated_at: parse_ts(&updated_at).unwrap_or(fallback),
        started_at: started_at.as_deref().and_then(parse_ts),
        finished_at: finished_at.as_deref().and_then(parse_ts),
    })
}
