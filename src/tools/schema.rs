//! 工具参数 Schema 与参数校验（schemars 自动生成）
//!
//! 每个工具声明一个 `#[derive(Deserialize, JsonSchema)]` 参数结构体：
//! - parameters_schema::<A>() 生成展示给 LLM 的 schema（字段文档注释即参数说明）
//! - parse_args::<A>() 在执行前按同一结构体校验，未知字段与类型错误都返回 InvalidArguments

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::ToolError;

/// 工具调用请求格式：与解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是可用工具清单中的一个
    pub tool: String,
    /// 工具参数，按该工具的 parameters schema 填写
    pub args: HashMap<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 参数结构体的 JSON Schema（去掉 $schema 元字段，保持 prompt 简洁）
pub fn parameters_schema<A: JsonSchema>() -> Value {
    let schema = schema_for!(A);
    let mut value = serde_json::to_value(&schema).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
    }
    value
}

/// 将 LLM 给出的 args 反序列化为参数结构体；缺省 args（null）按空对象处理
pub fn parse_args<A: DeserializeOwned>(args: Value) -> Result<A, ToolError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
