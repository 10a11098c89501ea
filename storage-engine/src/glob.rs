/// Match `subject` against a glob `pattern` supporting `*` and `?`.
///
/// Any other byte, including `[`, matches itself.
pub fn glob_match(pattern: &[u8], subject: &[u8]) -> bool {
    let (mut p, mut s) = (0, 0);
    // Position of the last `*` seen and the subject index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while s < subject.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, s));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                s += 1;
            }
            Some(&c) if c == subject[s] => {
                p += 1;
                s += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    p = star + 1;
                    s = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
