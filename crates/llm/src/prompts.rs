//! Prompt templates sent upstream.

/// Placeholder in [`FORTUNE_TEMPLATE`] replaced with the user's birth details.
const USER_INFO_PLACEHOLDER: &str = "<<<user_info>>>";

const FORTUNE_TEMPLATE: &str = "请根据以下信息进行专业的八字命理分析：\n<<<user_info>>>\n\n要求：\n1. 风格：亲切、专业、实诚。\n2. 结构：先分析五行强弱，再看十神心性，最后讲流年运势。\n3. 语气：像老朋友聊天一样，不要太晦涩。";

pub const COPYWRITING_SYSTEM_PROMPT: &str = "你是一个资深的小红书爆款文案创作者。请根据用户提供的主题和关键词，创作一篇小红书笔记。\n要求：\n1. 标题：吸引眼球，使用emoji，包含悬念或强烈情绪。\n2. 正文：口语化，多用emoji，分段清晰，有互动感。\n3. 标签：在文末添加5-8个相关标签。\n4. 风格：真诚分享，或者情绪价值拉满。";

/// Wrap free-form birth details into the reading request sent to the agent.
pub fn fortune_prompt(user_info: &str) -> String {
    FORTUNE_TEMPLATE.replace(USER_INFO_PLACEHOLDER, user_info.trim())
}

/// `主题：{topic}\n关键词：{keywords}`, with `无` when there are no keywords.
pub fn copywriting_user_prompt(topic: &str, keywords: Option<&str>) -> String {
    let keywords = keywords.map(str::trim).filter(|k| !k.is_empty()).unwrap_or("无");
    format!("主题：{}\n关键词：{}", topic.trim(), keywords)
}
