//! Static routing policy over block types.
//!
//! Flow-control blocks (router, condition, loop, parallel, workflow) only run
//! when a decision explicitly put them on the active path. Regular blocks are
//! activated transitively by any executed predecessor.

use crate::BlockType;
use serde::{Deserialize, Serialize};

pub const LOOP_START_HANDLE: &str = "loop-start-source";
pub const LOOP_END_HANDLE: &str = "loop-end-source";
pub const PARALLEL_START_HANDLE: &str = "parallel-start-source";
pub const PARALLEL_END_HANDLE: &str = "parallel-end-source";
pub const ERROR_HANDLE: &str = "error";
pub const CONDITION_HANDLE_PREFIX: &str = "condition-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlockCategory {
    FlowControl,
    Regular,
}

pub fn get_category(block_type: BlockType) -> BlockCategory {
    match block_type {
        BlockType::Router
        | BlockType::Condition
        | BlockType::Loop
        | BlockType::Parallel
        | BlockType::Workflow => BlockCategory::FlowControl,
        BlockType::Starter
        | BlockType::Agent
        | BlockType::Api
        | BlockType::Function
        | BlockType::Evaluator
        | BlockType::Response => BlockCategory::Regular,
    }
}

/// Flow-control blocks must be explicitly placed on the active path before
/// they are scheduled, even when their static dependencies are satisfied.
pub fn requires_active_path_check(block_type: BlockType) -> bool {
    get_category(block_type) == BlockCategory::FlowControl
}

/// Flow-control blocks are excluded from a layer when an upstream router or
/// condition decided for another branch, whatever else activated them.
pub fn should_skip_in_selective_activation(block_type: BlockType) -> bool {
    get_category(block_type) == BlockCategory::FlowControl
}

/// Reserved loop/parallel handles. Generic path propagation never follows them.
pub fn is_internal_handle(handle: Option<&str>) -> bool {
    matches!(
        handle,
        Some(LOOP_START_HANDLE)
            | Some(LOOP_END_HANDLE)
            | Some(PARALLEL_START_HANDLE)
            | Some(PARALLEL_END_HANDLE)
    )
}

pub fn is_container_end_handle(handle: Option<&str>) -> bool {
    matches!(handle, Some(LOOP_END_HANDLE) | Some(PARALLEL_END_HANDLE))
}

pub fn is_error_handle(handle: Option<&str>) -> bool {
    handle == Some(ERROR_HANDLE)
}

/// Handle carried by the connection leaving a condition block for `condition_id`.
pub fn condition_handle(condition_id: &str) -> String {
    format!("{}{}", CONDITION_HANDLE_PREFIX, condition_id)
}
