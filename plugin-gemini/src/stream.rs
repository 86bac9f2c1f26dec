//! 流式译文的累加
//!
//! 推送给调用方的译文只会变长，不会改写已推送的部分。
//! 外层代码块和引号的开头一经确认就去掉，可能是结尾的字符先留着，
//! 等后续内容到达或流结束时再决定。

use crate::parser::{clean_translation, is_tag_char, StreamFragment, FENCE, NORMAL_FINISH};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Wrapper {
    Fence,
    Quote,
}

/// 代码块标记之后语言行的长度（含换行）；还不足以判断时返回 `None`
fn fence_tag_len(after: &str) -> Option<usize> {
    let tag_len = after.find(|c: char| !is_tag_char(c))?;
    let line = &after[tag_len..];

    if line.starts_with('\n') {
        Some(tag_len + 1)
    } else if line.starts_with("\r\n") {
        Some(tag_len + 2)
    } else if line == "\r" {
        None
    } else {
        Some(0)
    }
}

/// 剥掉开头的外层包裹，返回包裹（由外到内）和剩下的正文
fn open_wrappers(raw: &str) -> Option<(Vec<Wrapper>, &str)> {
    let mut wrappers = vec![];
    let mut rest = raw.trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('"') {
            wrappers.push(Wrapper::Quote);
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix(FENCE) {
            rest = after[fence_tag_len(after)?..].trim_start();
            wrappers.push(Wrapper::Fence);
        } else if !rest.is_empty() && FENCE.starts_with(rest) {
            return None;
        } else {
            return Some((wrappers, rest));
        }
    }
}

/// 可能属于结尾包裹的字符
fn is_closer_char(c: char) -> bool {
    c.is_whitespace() || c == '`' || c == '"'
}

/// 由外到内去掉与开头配对的结尾，对不上就停下
fn close_wrappers<'a>(body: &'a str, wrappers: &[Wrapper]) -> &'a str {
    let mut text = body.trim_end();

    for wrapper in wrappers {
        let inner = match wrapper {
            Wrapper::Fence => text.strip_suffix(FENCE),
            Wrapper::Quote => text.strip_suffix('"'),
        };
        match inner {
            Some(inner) => text = inner.trim_end(),
            None => break,
        }
    }

    text
}

/// 流式译文的累加器，只追加不修改
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    raw: String,
    delivered: Option<String>,
    abnormal_finish: Option<String>,
    block_reason: Option<String>,
}

impl StreamAccumulator {
    /// 合并一帧；只有需要推送的新内容才返回，且总是上一次推送内容的延长
    pub fn apply(&mut self, fragment: StreamFragment) -> Option<String> {
        if let Some(reason) = fragment.finish_reason.filter(|r| r != NORMAL_FINISH) {
            self.abnormal_finish = Some(reason);
        }

        if let Some(reason) = fragment.block_reason {
            self.block_reason = Some(reason);
        }

        self.raw.push_str(fragment.text.as_deref()?);

        let (_, body) = open_wrappers(&self.raw)?;
        let visible = body.trim_end_matches(is_closer_char).to_string();

        self.deliver(visible)
    }

    /// 流结束：放出留到最后的结尾字符，去掉与开头配对的外层包裹
    pub fn finish(&mut self) -> Option<String> {
        let text = match open_wrappers(&self.raw) {
            Some((wrappers, body)) => close_wrappers(body, &wrappers).to_string(),
            // 开头一直无法判断，之前也就没有推送过
            None => clean_translation(&self.raw),
        };

        self.deliver(text)
    }

    fn deliver(&mut self, snapshot: String) -> Option<String> {
        if snapshot.is_empty() || self.delivered.as_deref() == Some(snapshot.as_str()) {
            return None;
        }

        self.delivered = Some(snapshot.clone());
        Some(snapshot)
    }

    pub fn delivered(&self) -> Option<&str> {
        self.delivered.as_deref()
    }

    pub fn abnormal_finish(&self) -> Option<&str> {
        self.abnormal_finish.as_deref()
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.block_reason.as_deref()
    }
}

#[cfg(test)]
fn text(s: &str) -> StreamFragment {
    StreamFragment {
        text: Some(s.to_string()),
        ..StreamFragment::default()
    }
}

/// 依次喂入各帧并结束流，返回全部推送，同时检查每次推送都延长了上一次
#[cfg(test)]
fn feed(fragments: &[&str]) -> Vec<String> {
    let mut acc = StreamAccumulator::default();

    let mut pushed: Vec<String> = fragments.iter().filter_map(|f| acc.apply(text(f))).collect();
    pushed.extend(acc.finish());

    for pair in pushed.windows(2) {
        assert!(pair[1].starts_with(pair[0].as_str()) && pair[1].len() > pair[0].len(), "{:?} -> {:?}", pair[0], pair[1]);
    }
    assert_eq!(acc.delivered(), pushed.last().map(String::as_str));

    pushed
}

#[test]
fn test_accumulator_grows_and_skips_duplicates() {
    let mut acc = StreamAccumulator::default();

    assert_eq!(acc.apply(text("Bon")).as_deref(), Some("Bon"));
    assert_eq!(acc.apply(StreamFragment::default()), None);
    assert_eq!(acc.apply(text("  ")), None);
    assert_eq!(acc.apply(text("jour")).as_deref(), Some("Bon  jour"));
    assert_eq!(acc.delivered(), Some("Bon  jour"));
}

#[test]
fn test_accumulator_records_abnormal_finish() {
    let mut acc = StreamAccumulator::default();

    acc.apply(StreamFragment {
        text: Some("Hal".to_string()),
        finish_reason: Some("MAX_TOKENS".to_string()),
        block_reason: None,
    });
    acc.apply(StreamFragment {
        text: Some("lo".to_string()),
        finish_reason: Some("STOP".to_string()),
        block_reason: None,
    });

    assert_eq!(acc.delivered(), Some("Hallo"));
    assert_eq!(acc.abnormal_finish(), Some("MAX_TOKENS"));
}

#[test]
fn test_fenced_stream_only_grows() {
    assert_eq!(feed(&["```json\n", "Hallo Welt", "\n```"]), vec!["Hallo Welt"]);

    // 标记和语言行被拆开
    assert_eq!(feed(&["``", "`text", "\nHal", "lo\n``", "`"]), vec!["Hal", "Hallo"]);
    assert_eq!(feed(&["```json\r", "\n{\"a\": 1}\r\n```"]), vec!["{\"a\": 1}"]);
}

#[test]
fn test_quoted_stream_only_grows() {
    assert_eq!(feed(&["\"Hal", "lo\""]), vec!["Hal", "Hallo"]);
    assert_eq!(feed(&["\"```\nx", "\n```\""]), vec!["x"]);
}

#[test]
fn test_held_closer_is_released_by_more_text() {
    assert_eq!(
        feed(&["He said \"hi", "\"", " today"]),
        vec!["He said \"hi", "He said \"hi\" today"]
    );
    assert_eq!(feed(&["Tschüss ", "`", "ok"]), vec!["Tschüss", "Tschüss `ok"]);
}

#[test]
fn test_finish_releases_unmatched_tail() {
    assert_eq!(feed(&["He said \"hi", "\""]), vec!["He said \"hi", "He said \"hi\""]);
    assert_eq!(feed(&["``"]), vec!["``"]);
    assert_eq!(feed(&["   "]), Vec::<String>::new());

    let mut empty = StreamAccumulator::default();
    assert_eq!(empty.finish(), None);
}

#[test]
fn test_stream_cleanup_matches_buffered_cleanup() {
    for fragments in [
        &["```\n", "Bon", "jour\n", "```"][..],
        &["\"Bon", "jour\"  "][..],
        &["  Bon ", "jour "][..],
    ] {
        let pushed = feed(fragments);
        assert_eq!(pushed.last().map(String::as_str), Some(clean_translation(&fragments.concat()).as_str()));
    }
}
