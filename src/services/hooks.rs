// ==========================================
// 商品目录批量导入系统 - 导入后置钩子
// ==========================================
// 职责: 下游协作方（渠道同步 / 条码分配 / 属性继承）的窄接口
// 约定: 仅在创建阶段成功后调用；钩子失败只记日志，不改变导入结果
// ==========================================

use crate::domain::product::ImportResult;

pub trait PostImportHook: Send + Sync {
    /// 钩子名称（日志使用）
    fn name(&self) -> &str;

    fn after_import(&self, import_id: &str, result: &ImportResult) -> anyhow::Result<()>;
}
