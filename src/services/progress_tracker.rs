// ==========================================
// 商品目录批量导入系统 - 导入进度跟踪
// ==========================================
// 职责: 导入任务状态机 pending → processing → {completed | failed | cancelled}
// 存储: 双写
// - 进度缓存（DashMap + TTL）: 新鲜时为准
// - import_progress 表: 缓存过期 / 进程重启后的回退
// 约定:
// - 状态转换全部走仓储层条件 UPDATE，未生效即视为已被其他终态抢占
// - 结果超出内联上限时外置到 import_payload，记录中只保留引用键
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::domain::product::ImportResult;
use crate::domain::progress::ProgressRecord;
use crate::domain::types::ImportStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::progress_repo::{FinishUpdate, ProgressRepository};
use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

struct CacheEntry {
    record: ProgressRecord,
    cached_at: Instant,
}

// ==========================================
// ProgressTracker
// ==========================================
pub struct ProgressTracker {
    repo: ProgressRepository,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
    inline_limit: usize,
    retention_hours: i64,
}

impl ProgressTracker {
    pub fn new(repo: ProgressRepository, config: &ImportConfig) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            inline_limit: config.inline_result_limit_bytes,
            retention_hours: config.retention_hours,
        }
    }

    fn remember(&self, record: ProgressRecord) {
        self.cache.insert(
            record.id.clone(),
            CacheEntry {
                record,
                cached_at: Instant::now(),
            },
        );
    }

    /// 条件 UPDATE 未生效时，以持久记录覆盖缓存
    fn refresh_from_store(&self, id: &str) -> RepositoryResult<Option<ProgressRecord>> {
        let record = self.repo.find(id)?;
        match &record {
            Some(r) => self.remember(r.clone()),
            None => {
                self.cache.remove(id);
            }
        }
        Ok(record)
    }

    /// 新建 pending 任务，返回不透明 ID
    pub fn create_pending(&self) -> RepositoryResult<ProgressRecord> {
        let record = ProgressRecord::pending(Uuid::new_v4().to_string(), now());
        self.repo.insert(&record)?;
        self.remember(record.clone());
        info!(import_id = %record.id, "导入任务已创建");
        Ok(record)
    }

    /// pending → processing
    ///
    /// # 返回
    /// - false: 任务已不在 pending（通常是执行前被取消）
    pub fn mark_processing(&self, id: &str) -> RepositoryResult<bool> {
        let ts = now();
        if !self.repo.mark_processing(id, ts)? {
            self.refresh_from_store(id)?;
            return Ok(false);
        }
        if let Some(mut entry) = self.cache.get_mut(id) {
            entry.record.status = ImportStatus::Processing;
            entry.record.message = "执行中".to_string();
            entry.record.started_at = Some(ts);
            entry.record.updated_at = ts;
            entry.cached_at = Instant::now();
        } else {
            self.refresh_from_store(id)?;
        }
        Ok(true)
    }

    /// 进度更新（仅 processing 生效）
    pub fn update(&self, id: &str, percent: u8, message: &str, elapsed_time: f64) -> RepositoryResult<bool> {
        let percent = percent.min(100);
        let ts = now();
        let applied = self
            .repo
            .update_progress(id, percent, message, elapsed_time, ts)?;
        if !applied {
            debug!(import_id = %id, percent, "进度更新未生效（任务已不在执行中）");
            return Ok(false);
        }
        if let Some(mut entry) = self.cache.get_mut(id) {
            entry.record.progress_percent = percent;
            entry.record.message = message.to_string();
            entry.record.elapsed_time = elapsed_time;
            entry.record.updated_at = ts;
            entry.cached_at = Instant::now();
        }
        Ok(true)
    }

    /// processing → completed
    ///
    /// # 返回
    /// - 最终状态（若期间已取消，保持 cancelled）
    pub fn complete(&self, id: &str, result: &ImportResult, elapsed_time: f64) -> RepositoryResult<ImportStatus> {
        let payload = serde_json::to_string(result)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;

        let (result_json, result_ref) = if payload.len() > self.inline_limit {
            let key = format!("{}:result", id);
            self.repo.store_payload(&key, id, &payload, now())?;
            debug!(import_id = %id, bytes = payload.len(), payload_key = %key, "结果外置存储");
            (None, Some(key))
        } else {
            (Some(payload), None)
        };

        let update = FinishUpdate {
            status: ImportStatus::Completed,
            message: format!(
                "导入完成: 父商品 {} / 变体 {} / 错误 {}",
                result.products_created,
                result.variants_created,
                result.error_count()
            ),
            elapsed_time,
            result_json,
            result_ref,
            error_message: None,
        };
        self.finish(id, &update)
    }

    /// processing → failed
    pub fn fail(&self, id: &str, error_message: &str, elapsed_time: f64) -> RepositoryResult<ImportStatus> {
        let update = FinishUpdate {
            status: ImportStatus::Failed,
            message: "导入失败".to_string(),
            elapsed_time,
            result_json: None,
            result_ref: None,
            error_message: Some(error_message.to_string()),
        };
        self.finish(id, &update)
    }

    fn finish(&self, id: &str, update: &FinishUpdate) -> RepositoryResult<ImportStatus> {
        let applied = self.repo.finish(id, update, now())?;
        let record = self.refresh_from_store(id)?;
        let status = record.map(|r| r.status).unwrap_or(update.status);
        if applied {
            info!(import_id = %id, status = %status, elapsed = update.elapsed_time, "导入任务结束");
        } else {
            warn!(
                import_id = %id,
                requested = %update.status,
                actual = %status,
                "终态写入未生效，保留现有状态"
            );
        }
        Ok(status)
    }

    /// pending / processing → cancelled
    pub fn cancel(&self, id: &str) -> RepositoryResult<bool> {
        let applied = self.repo.cancel(id, now())?;
        self.refresh_from_store(id)?;
        if applied {
            info!(import_id = %id, "导入任务已取消");
        } else {
            debug!(import_id = %id, "取消未生效（任务不存在或已结束）");
        }
        Ok(applied)
    }

    /// 取消检查点: 直接读取持久状态
    pub fn is_cancel_requested(&self, id: &str) -> bool {
        match self.repo.find_status(id) {
            Ok(status) => status == Some(ImportStatus::Cancelled),
            Err(e) => {
                warn!(import_id = %id, error = %e, "读取任务状态失败，按未取消处理");
                false
            }
        }
    }

    /// 查询进度: 新鲜缓存优先，否则回退持久记录
    pub fn status(&self, id: &str) -> RepositoryResult<Option<ProgressRecord>> {
        if let Some(entry) = self.cache.get(id) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(Some(entry.record.clone()));
            }
        }
        self.refresh_from_store(id)
    }

    /// 读取结果（内联或外置）
    pub fn result(&self, id: &str) -> RepositoryResult<Option<ImportResult>> {
        let Some(record) = self.status(id)? else {
            return Ok(None);
        };

        let value = match (record.result_data, record.result_ref) {
            (Some(inline), _) => inline,
            (None, Some(key)) => match self.repo.load_payload(&key)? {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| RepositoryError::SerializationError(e.to_string()))?,
                None => return Ok(None),
            },
            (None, None) => return Ok(None),
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    /// 清理超过留存时长的记录与外置结果
    ///
    /// # 返回
    /// - (删除的进度记录数, 删除的外置结果数)
    pub fn cleanup(&self) -> RepositoryResult<(usize, usize)> {
        self.cleanup_older_than_hours(self.retention_hours)
    }

    pub fn cleanup_older_than_hours(&self, hours: i64) -> RepositoryResult<(usize, usize)> {
        let cutoff = now() - chrono::Duration::hours(hours);
        let (records, payloads) = self.repo.cleanup_older_than(cutoff)?;
        self.cache
            .retain(|_, entry| entry.record.updated_at >= cutoff && entry.cached_at.elapsed() < self.ttl);
        info!(records, payloads, hours, "过期导入记录已清理");
        Ok((records, payloads))
    }
}
