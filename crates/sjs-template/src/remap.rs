use regex::Regex;

/// One spliced block: where its output ends in the spliced body and how many
/// lines it removed (raw lines - output lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SplicedBlock {
    end_line: usize,
    end_offset: usize,
    delta: i64,
}

/// Line shifts introduced by splicing script output into a body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpliceMap {
    blocks: Vec<SplicedBlock>,
}

impl SpliceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a block whose output starts on `spliced_line`, at byte
    /// `spliced_offset` of the spliced body.
    pub fn record(
        &mut self,
        spliced_line: usize,
        spliced_offset: usize,
        raw_text: &str,
        rendered: &str,
    ) {
        let raw_lines = raw_text.matches('\n').count();
        let rendered_lines = rendered.matches('\n').count();
        self.blocks.push(SplicedBlock {
            end_line: spliced_line + rendered_lines,
            end_offset: spliced_offset + rendered.len(),
            delta: raw_lines as i64 - rendered_lines as i64,
        });
    }

    pub fn net_delta(&self) -> i64 {
        self.blocks.iter().map(|block| block.delta).sum()
    }

    /// Maps a line of the spliced body to the matching line of the original.
    /// Text sharing a line with the end of a block is taken to come before it.
    pub fn original_line(&self, spliced_line: usize) -> usize {
        let shift: i64 = self
            .blocks
            .iter()
            .filter(|block| spliced_line > block.end_line)
            .map(|block| block.delta)
            .sum();
        shift_line(spliced_line, shift)
    }

    /// Like [`original_line`](Self::original_line), but a known byte offset
    /// decides which side of a block the position is on.
    pub fn original_position(&self, spliced_line: usize, offset: Option<usize>) -> usize {
        let Some(offset) = offset else {
            return self.original_line(spliced_line);
        };
        let shift: i64 = self
            .blocks
            .iter()
            .filter(|block| offset >= block.end_offset)
            .map(|block| block.delta)
            .sum();
        shift_line(spliced_line, shift)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn shift_line(line: usize, shift: i64) -> usize {
    (line as i64 + shift).max(1) as usize
}

/// Rewrites `template: <name>:<line>` locators in `message` from spliced-body
/// lines to original lines. Locators naming other templates are untouched,
/// and any locator that cannot be parsed is kept as it was. `offset` is the
/// byte offset of the failure and applies to the first locator only.
pub fn adjust_line_numbers(
    name: &str,
    message: &str,
    splices: &SpliceMap,
    offset: Option<usize>,
) -> String {
    if splices.is_empty() {
        return message.to_string();
    }
    let pattern = format!(r"template: {}:(\d+)", regex::escape(name));
    let Ok(locator) = Regex::new(&pattern) else {
        tracing::warn!(template = name, "could not build line locator pattern");
        return message.to_string();
    };
    let mut offset = offset;
    locator
        .replace_all(message, |captures: &regex::Captures<'_>| {
            let whole = &captures[0];
            match captures[1].parse::<usize>() {
                Ok(line) => format!(
                    "template: {}:{}",
                    name,
                    splices.original_position(line, offset.take())
                ),
                Err(_) => whole.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod remap_tests {
    use super::*;

    #[test]
    fn three_line_block_rendered_to_one_line_shifts_later_lines_by_two() {
        let mut splices = SpliceMap::new();
        splices.record(2, 2, "```sjs\nrender(\"a\")\nsjs```", "a");
        assert_eq!(splices.net_delta(), 2);
        assert_eq!(splices.original_line(1), 1);
        assert_eq!(splices.original_line(2), 2);
        assert_eq!(splices.original_line(3), 5);
    }

    #[test]
    fn shifts_accumulate_per_block() {
        let mut splices = SpliceMap::new();
        splices.record(1, 0, "```sjs\nx\nsjs```", "");
        splices.record(3, 2, "```sjs\na\nb\nc\nsjs```", "one\ntwo");
        assert_eq!(splices.original_line(2), 4);
        assert_eq!(splices.original_line(4), 6);
        assert_eq!(splices.original_line(5), 10);
        assert_eq!(splices.net_delta(), 5);
    }

    #[test]
    fn only_the_current_template_is_rewritten() {
        let mut splices = SpliceMap::new();
        splices.record(1, 0, "```sjs\n\n\nsjs```", "");
        let message = "template: page.tmpl:4: undefined value: template: other.tmpl:4: boom";
        assert_eq!(
            adjust_line_numbers("page.tmpl", message, &splices, None),
            "template: page.tmpl:7: undefined value: template: other.tmpl:4: boom"
        );
    }

    #[test]
    fn names_are_matched_literally() {
        let mut splices = SpliceMap::new();
        splices.record(1, 0, "```sjs\n\nsjs```", "");
        let message = "template: aXtmpl:3: boom";
        assert_eq!(adjust_line_numbers("a.tmpl", message, &splices, None), message);
        assert_eq!(
            adjust_line_numbers("a.tmpl", "template: a.tmpl:3: boom", &splices, None),
            "template: a.tmpl:5: boom"
        );
    }

    #[test]
    fn unparseable_locators_are_left_alone() {
        let mut splices = SpliceMap::new();
        splices.record(1, 0, "```sjs\n\nsjs```", "");
        let huge = "template: a.tmpl:99999999999999999999999: boom";
        assert_eq!(adjust_line_numbers("a.tmpl", huge, &splices, None), huge);
    }

    #[test]
    fn text_after_a_closing_fence_on_the_same_line_is_shifted() {
        // "a ```sjs\nlet q = 1;\nsjs``` {{ x }}" splices to "a  {{ x }}"
        let mut splices = SpliceMap::new();
        splices.record(1, 2, "```sjs\nlet q = 1;\nsjs```", "");
        assert_eq!(splices.original_line(1), 1);
        assert_eq!(splices.original_position(1, Some(0)), 1);
        assert_eq!(splices.original_position(1, Some(3)), 3);
        assert_eq!(splices.original_position(1, None), 1);
        assert_eq!(
            adjust_line_numbers("p.tmpl", "template: p.tmpl:1: boom", &splices, Some(3)),
            "template: p.tmpl:3: boom"
        );
    }

    #[test]
    fn offsets_only_rewrite_the_first_locator() {
        let mut splices = SpliceMap::new();
        splices.record(1, 0, "```sjs\n\nsjs```", "x");
        let message = "template: p.tmpl:1: boom: template: p.tmpl:1: inner";
        assert_eq!(
            adjust_line_numbers("p.tmpl", message, &splices, Some(1)),
            "template: p.tmpl:3: boom: template: p.tmpl:1: inner"
        );
    }
}
