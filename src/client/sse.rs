use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::{Stream, StreamExt, stream};

/// 把 SSE 字节流切分成每个事件的 data 内容
///
/// 行尾可以是 `\r\n`、`\n` 或单独的 `\r`。多行 data 以换行拼接；
/// 注释行（以冒号开头，如保活）和没有 data 的事件被忽略。
/// 底层流出错时记录日志并结束。
pub fn data_frames<S, B, E>(bytes: S) -> impl Stream<Item = String> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (
        Box::pin(bytes),
        LineEndings::default(),
        Vec::<u8>::new(),
        VecDeque::<String>::new(),
    );

    stream::unfold(state, |(mut bytes, mut endings, mut buf, mut ready)| async move {
        loop {
            if let Some(frame) = ready.pop_front() {
                return Some((frame, (bytes, endings, buf, ready)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => {
                    endings.normalize_into(chunk.as_ref(), &mut buf);
                    while let Some(end) = find_frame_end(&buf) {
                        let frame: Vec<u8> = buf.drain(..end + 2).collect();
                        if let Some(data) = parse_frame(&String::from_utf8_lossy(&frame)) {
                            ready.push_back(data);
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Event stream interrupted: {}", e);
                    return None;
                }
                None => return None,
            }
        }
    })
}

/// 把 `\r\n` 和单独的 `\r` 统一成 `\n`，`\r\n` 可能被拆在两个分块之间
#[derive(Default)]
struct LineEndings {
    after_cr: bool,
}

impl LineEndings {
    fn normalize_into(&mut self, chunk: &[u8], buf: &mut Vec<u8>) {
        for &b in chunk {
            let after_cr = std::mem::replace(&mut self.after_cr, b == b'\r');
            match b {
                b'\r' => buf.push(b'\n'),
                b'\n' if after_cr => {}
                _ => buf.push(b),
            }
        }
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(frame: &str) -> Option<String> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}
