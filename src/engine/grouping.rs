// ==========================================
// 商品目录批量导入系统 - 父商品归并（分组阶段）
// ==========================================
// 职责: 将变体行划分为父商品分组，并建立 行下标 → 分组下标 索引
// 顺序:
// 1. 显式 parent_sku 列 → 按声明值分组
// 2. SKU 模式键（见 sku_pattern）→ 按键分组
// 3. 其余行: 与已有名称分组的首成员比较相似度，命中则加入，否则新建
// 约定:
// - 每行恰属一个分组；is_parent 行不参与分组
// - 父商品 SKU 仅在全部成员解析出相同键时设置
// ==========================================

use crate::domain::product::{ParentGroup, TransformedRow};
use crate::engine::attribute_inference::infer_group_attributes;
use crate::engine::name_similarity::{base_name, derive_parent_name, names_similar, normalize_name};
use crate::engine::sku_pattern::extract_sku_key;
use std::collections::HashMap;
use tracing::{debug, info};

/// 分组产物
#[derive(Debug, Clone, Default)]
pub struct GroupingOutcome {
    pub groups: Vec<ParentGroup>,
    /// transformed_rows 下标 → groups 下标
    pub row_index: HashMap<usize, usize>,
}

impl GroupingOutcome {
    pub fn group_of(&self, row: usize) -> Option<&ParentGroup> {
        self.row_index.get(&row).and_then(|g| self.groups.get(*g))
    }
}

enum Assignment {
    Declared(String),
    Sku(String),
    Name,
}

struct Draft {
    group_key: String,
    members: Vec<usize>,
    /// 成员各自解析出的 SKU 键（None 表示未解析）
    sku_keys: Vec<Option<String>>,
    by_name: bool,
}

pub struct ParentGrouper {
    drop_threshold_cm: f64,
}

impl ParentGrouper {
    pub fn new(drop_threshold_cm: f64) -> Self {
        Self { drop_threshold_cm }
    }

    pub fn group(&self, rows: &[TransformedRow]) -> GroupingOutcome {
        let mut drafts: Vec<Draft> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for (idx, row) in rows.iter().enumerate() {
            if row.is_parent() {
                continue;
            }

            let sku_key = row
                .text("sku")
                .and_then(extract_sku_key)
                .map(|k| k.key);
            let assignment = match (row.text("parent_sku"), &sku_key) {
                (Some(declared), _) => Assignment::Declared(declared.to_uppercase()),
                (None, Some(key)) => Assignment::Sku(key.clone()),
                (None, None) => Assignment::Name,
            };

            let key = match assignment {
                Assignment::Declared(sku) => Some(format!("parent:{}", sku)),
                Assignment::Sku(key) => Some(format!("sku:{}", key)),
                Assignment::Name => None,
            };

            let slot = match key {
                Some(key) => match by_key.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        drafts.push(Draft {
                            group_key: key.clone(),
                            members: Vec::new(),
                            sku_keys: Vec::new(),
                            by_name: false,
                        });
                        by_key.insert(key, drafts.len() - 1);
                        drafts.len() - 1
                    }
                },
                None => self.find_or_create_name_group(&mut drafts, rows, row),
            };

            drafts[slot].members.push(idx);
            drafts[slot].sku_keys.push(sku_key);
        }

        let mut outcome = GroupingOutcome::default();
        for draft in drafts {
            let members: Vec<&TransformedRow> = draft.members.iter().map(|i| &rows[*i]).collect();
            let names: Vec<&str> = members.iter().filter_map(|r| r.text("name")).collect();

            let parent_sku = match draft.group_key.strip_prefix("parent:") {
                Some(declared) => Some(declared.to_string()),
                None => unanimous_key(&draft.sku_keys),
            };

            let group = ParentGroup {
                group_key: draft.group_key,
                parent_name: derive_parent_name(&names),
                parent_sku,
                inferred_parent_attributes: infer_group_attributes(&members, self.drop_threshold_cm),
                member_row_indices: draft.members,
            };
            debug!(
                group_key = %group.group_key,
                members = group.member_row_indices.len(),
                by_name = draft.by_name,
                parent_name = %group.parent_name,
                "分组完成"
            );

            let slot = outcome.groups.len();
            for idx in &group.member_row_indices {
                outcome.row_index.insert(*idx, slot);
            }
            outcome.groups.push(group);
        }

        info!(
            rows = rows.len(),
            groups = outcome.groups.len(),
            grouped_rows = outcome.row_index.len(),
            "父商品分组完成"
        );
        outcome
    }

    fn find_or_create_name_group(
        &self,
        drafts: &mut Vec<Draft>,
        rows: &[TransformedRow],
        row: &TransformedRow,
    ) -> usize {
        let name = row.text("name").unwrap_or_default();

        if !name.is_empty() {
            let hit = drafts.iter().position(|d| {
                d.by_name
                    && d.members
                        .first()
                        .and_then(|first| rows[*first].text("name"))
                        .is_some_and(|first_name| names_similar(first_name, name))
            });
            if let Some(slot) = hit {
                return slot;
            }
        }

        let label = match base_name(name) {
            b if !b.is_empty() => b,
            _ => normalize_name(name),
        };
        let group_key = if label.is_empty() {
            format!("row:{}", row.row_number)
        } else {
            format!("name:{}#{}", label, row.row_number)
        };
        drafts.push(Draft {
            group_key,
            members: Vec::new(),
            sku_keys: Vec::new(),
            by_name: true,
        });
        drafts.len() - 1
    }
}

fn unanimous_key(keys: &[Option<String>]) -> Option<String> {
    let first = keys.first()?.as_ref()?;
    keys.iter()
        .all(|k| k.as_ref() == Some(first))
        .then(|| first.clone())
}
