use super::BindValue;

pub(super) fn push_text(bind_params: &mut Vec<BindValue>, value: String) -> usize {
    bind_params.push(BindValue::Text(value));
    bind_params.len()
}

pub(super) fn push_int(bind_params: &mut Vec<BindValue>, value: i32) -> usize {
    bind_params.push(BindValue::Int(value));
    bind_params.len()
}

/// `:1, :2, ...` for a run of placeholder indexes.
pub(super) fn placeholder_list(indexes: &[usize]) -> String {
    indexes
        .iter()
        .map(|i| format!(":{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
