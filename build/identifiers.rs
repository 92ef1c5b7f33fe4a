// Line-level identifier checks shared by the build script and its tests.

/// True when an underscore-prefixed identifier such as `_unused` appears on `line`
/// outside every string literal. Anything after a `//` outside a string is ignored.
pub fn has_underscore_identifier_outside_strings(line: &str) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut in_string = false;
    let mut raw = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' && !raw {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                raw = i > 0 && matches!(chars[i - 1], 'r' | '#');
            }
            '/' if chars.get(i + 1) == Some(&'/') => return false,
            '_' => {
                let starts_word = i == 0 || !is_word(chars[i - 1]);
                let continues = chars.get(i + 1).is_some_and(|&next| is_word(next));
                if starts_word && continues {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
