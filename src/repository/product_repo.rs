// ==========================================
// 商品目录批量导入系统 - 商品仓储 Trait
// ==========================================
// 职责: 定义商品落库接口（不包含业务逻辑）
// - ProductRepository: 分块事务边界
// - CatalogWriter: 事务内写入原语
// - BulkTuning / OptimizedSession: 批量模式存储参数（作用域内放宽，最后一个会话 Drop 时恢复）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::product::{ImportResult, NewParent, NewVariant};
use crate::repository::error::{RepositoryError, RepositoryResult};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

// ==========================================
// CatalogWriter - 事务内写入原语
// ==========================================
// 生命周期: 仅在 with_chunk_transaction 回调内有效
pub trait CatalogWriter {
    /// 创建父商品，返回新 ID
    fn create_parent(&mut self, parent: &NewParent) -> RepositoryResult<i64>;

    /// 按名称查找父商品（精确匹配，取最早创建者）
    fn find_parent_by_name(&mut self, name: &str) -> RepositoryResult<Option<i64>>;

    /// 创建变体，返回新 ID
    ///
    /// # 错误
    /// - UniqueConstraintViolation: SKU 重复（行级，事务仍可继续）
    fn create_variant(&mut self, variant: &NewVariant) -> RepositoryResult<i64>;
}

/// 分块事务回调
pub type ChunkWork<'w> = dyn FnMut(&mut dyn CatalogWriter) -> RepositoryResult<ImportResult> + 'w;

// ==========================================
// BulkTuning - 批量模式存储参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningSnapshot {
    /// PRAGMA synchronous（0=OFF 1=NORMAL 2=FULL 3=EXTRA）
    pub synchronous: i64,
    pub foreign_keys: bool,
}

pub trait BulkTuning {
    /// 读取当前参数
    fn read_tuning(&self) -> RepositoryResult<TuningSnapshot>;

    /// 写入参数（必须在事务外调用）
    fn apply_tuning(&self, tuning: TuningSnapshot) -> RepositoryResult<()>;

    /// 同一连接上所有批量会话共用的计数闸门
    fn bulk_gate(&self) -> &BulkGate;
}

// ==========================================
// BulkGate - 批量会话计数
// ==========================================
// 第一个会话记录原参数并放宽，最后一个会话结束时恢复
#[derive(Debug, Default)]
pub struct BulkGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    active: usize,
    saved: Option<TuningSnapshot>,
}

impl BulkGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前活跃的批量会话数
    pub fn active_sessions(&self) -> usize {
        self.lock().map(|s| s.active).unwrap_or(0)
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, GateState>> {
        self.state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

/// 批量模式参数
pub const BULK_TUNING: TuningSnapshot = TuningSnapshot {
    synchronous: 0,
    foreign_keys: false,
};

// ==========================================
// ProductRepository - 商品仓储
// ==========================================
// 实现者: SqliteProductRepository
pub trait ProductRepository: BulkTuning + Send + Sync {
    /// 在单个事务内执行一个分块
    ///
    /// # 说明
    /// - work 返回 Ok: 提交
    /// - work 返回 Err: 回滚，错误原样返回
    /// - 连接锁仅在本次调用内持有
    fn with_chunk_transaction(
        &self,
        import_id: &str,
        work: &mut ChunkWork<'_>,
    ) -> RepositoryResult<ImportResult>;

    fn count_parents(&self) -> RepositoryResult<usize>;

    fn count_variants(&self) -> RepositoryResult<usize>;

    /// 查询父商品 (id, name, sku, attributes)
    fn list_parents(&self) -> RepositoryResult<Vec<ParentRow>>;

    /// 查询某父商品下的变体 SKU（按源行号排序）
    fn list_variant_skus(&self, parent_id: i64) -> RepositoryResult<Vec<Option<String>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParentRow {
    pub id: i64,
    pub name: String,
    pub sku: Option<String>,
    pub attributes: Value,
}

// ==========================================
// OptimizedSession - 批量模式作用域守卫
// ==========================================
// 会话可重叠（同一连接上的并发导入）；参数只在首个会话开启时记录，
// 最后一个会话 Drop 时无条件恢复（含错误/panic 路径）
pub struct OptimizedSession<'a, T: BulkTuning + ?Sized> {
    tuning: &'a T,
    active: bool,
}

impl<'a, T: BulkTuning + ?Sized> OptimizedSession<'a, T> {
    /// 开启批量模式
    ///
    /// # 参数
    /// - enabled: false 时为空守卫（不修改任何参数）
    pub fn begin(tuning: &'a T, enabled: bool) -> RepositoryResult<Self> {
        if !enabled {
            return Ok(Self {
                tuning,
                active: false,
            });
        }

        let mut state = tuning.bulk_gate().lock()?;
        if state.active == 0 {
            let saved = tuning.read_tuning()?;
            tuning.apply_tuning(BULK_TUNING)?;
            state.saved = Some(saved);
            tracing::debug!(
                synchronous = saved.synchronous,
                foreign_keys = saved.foreign_keys,
                "批量模式开启"
            );
        }
        state.active += 1;
        tracing::debug!(sessions = state.active, "批量会话加入");

        Ok(Self {
            tuning,
            active: true,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl<T: BulkTuning + ?Sized> Drop for OptimizedSession<'_, T> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let mut state = match self.tuning.bulk_gate().lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "批量会话计数不可用，参数未恢复");
                return;
            }
        };
        state.active = state.active.saturating_sub(1);
        if state.active > 0 {
            tracing::debug!(sessions = state.active, "仍有批量会话，暂不恢复参数");
            return;
        }
        if let Some(saved) = state.saved.take() {
            match self.tuning.apply_tuning(saved) {
                Ok(()) => tracing::debug!("批量模式参数已恢复"),
                Err(e) => tracing::error!(error = %e, "批量模式参数恢复失败"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTuning {
        current: RefCell<TuningSnapshot>,
        gate: BulkGate,
    }

    impl FakeTuning {
        fn new(original: TuningSnapshot) -> Self {
            Self {
                current: RefCell::new(original),
                gate: BulkGate::new(),
            }
        }
    }

    impl BulkTuning for FakeTuning {
        fn read_tuning(&self) -> RepositoryResult<TuningSnapshot> {
            Ok(*self.current.borrow())
        }

        fn apply_tuning(&self, tuning: TuningSnapshot) -> RepositoryResult<()> {
            *self.current.borrow_mut() = tuning;
            Ok(())
        }

        fn bulk_gate(&self) -> &BulkGate {
            &self.gate
        }
    }

    #[test]
    fn test_session_restores_on_drop() {
        let original = TuningSnapshot {
            synchronous: 2,
            foreign_keys: true,
        };
        let fake = FakeTuning::new(original);

        {
            let session = OptimizedSession::begin(&fake, true).unwrap();
            assert!(session.is_active());
            assert_eq!(*fake.current.borrow(), BULK_TUNING);
        }
        assert_eq!(*fake.current.borrow(), original);
    }

    #[test]
    fn test_disabled_session_is_noop() {
        let original = TuningSnapshot {
            synchronous: 1,
            foreign_keys: true,
        };
        let fake = FakeTuning::new(original);
        let session = OptimizedSession::begin(&fake, false).unwrap();
        assert!(!session.is_active());
        assert_eq!(*fake.current.borrow(), original);
        assert_eq!(fake.gate.active_sessions(), 0);
    }

    #[test]
    fn test_overlapping_sessions_restore_after_last() {
        let original = TuningSnapshot {
            synchronous: 2,
            foreign_keys: true,
        };
        let fake = FakeTuning::new(original);

        // A 开启 → B 开启 → A 结束 → B 结束
        let a = OptimizedSession::begin(&fake, true).unwrap();
        let b = OptimizedSession::begin(&fake, true).unwrap();
        assert_eq!(fake.gate.active_sessions(), 2);
        assert_eq!(*fake.current.borrow(), BULK_TUNING);

        drop(a);
        assert_eq!(fake.gate.active_sessions(), 1);
        assert_eq!(*fake.current.borrow(), BULK_TUNING);

        drop(b);
        assert_eq!(fake.gate.active_sessions(), 0);
        assert_eq!(*fake.current.borrow(), original);

        // 闸门归零后可再次开启
        {
            let _c = OptimizedSession::begin(&fake, true).unwrap();
            assert_eq!(*fake.current.borrow(), BULK_TUNING);
        }
        assert_eq!(*fake.current.borrow(), original);
    }
}
