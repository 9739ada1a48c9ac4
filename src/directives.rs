use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(String),
    Image(String),
    Emotion(String),
}

pub fn tokenize(input: &str) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find('[') {
        push_text(&mut blocks, &rest[..open]);
        let candidate = &rest[open..];
        match parse_directive(candidate) {
            Some((block, consumed)) => {
                blocks.push(block);
                rest = &candidate[consumed..];
            }
            None => {
                push_text(&mut blocks, "[");
                rest = &candidate[1..];
            }
        }
    }
    push_text(&mut blocks, rest);
    blocks
}

/// `candidate` starts at `[`. Returns the block and the bytes consumed.
fn parse_directive(candidate: &str) -> Option<(ContentBlock, usize)> {
    let close = candidate.find(']')?;
    let inner = &candidate[1..close];
    if inner.contains('[') || inner.contains('\n') {
        return None;
    }
    let (kind, value) = inner.split_once(':')?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let block = match kind.trim().to_ascii_lowercase().as_str() {
        "image" => ContentBlock::Image(value.to_string()),
        "emotion" => ContentBlock::Emotion(value.to_ascii_lowercase()),
        _ => return None,
    };
    Some((block, close + 1))
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(ContentBlock::Text(last)) = blocks.last_mut() {
        last.push_str(text);
    } else {
        blocks.push(ContentBlock::Text(text.to_string()));
    }
}
