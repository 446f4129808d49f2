// JNI signature and class-name helpers

/// Convert a JNI type signature to a dotted class name.
/// "Ljava/awt/Window;" becomes "java.awt.Window"; primitive and array
/// signatures get readable spellings.
pub fn signature_to_dotted(sig: &str) -> String {
    match sig.as_bytes().first() {
        Some(b'L') => sig
            .trim_start_matches('L')
            .trim_end_matches(';')
            .replace('/', "."),
        Some(b'[') => format!("{}[]", signature_to_dotted(&sig[1..])),
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        _ => sig.to_string(),
    }
}

/// Convert a dotted class name to its JNI object signature.
pub fn dotted_to_signature(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

/// Dotted name for an object-reference signature only; None for
/// primitives and arrays.
pub fn object_signature_to_dotted(sig: &str) -> Option<String> {
    if sig.starts_with('L') && sig.ends_with(';') {
        Some(sig[1..sig.len() - 1].replace('/', "."))
    } else {
        None
    }
}

/// The segment after the last '.' of a dotted name.
pub fn simple_name(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

/// The package part of a dotted name, "" for the default package.
pub fn package_of(dotted: &str) -> &str {
    match dotted.rfind('.') {
        Some(idx) => &dotted[..idx],
        None => "",
    }
}

/// Split a JNI method signature "(A B C)R" into parameter signatures and
/// the return signature. Returns None on malformed input.
pub fn parse_method_signature(sig: &str) -> Option<(Vec<String>, String)> {
    let rest = sig.strip_prefix('(')?;
    let close = rest.find(')')?;
    let (params_str, ret) = (&rest[..close], &rest[close + 1..]);

    let mut params = Vec::new();
    let bytes = params_str.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        // consume array dimensions
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'L' => {
                let end = params_str[i..].find(';')? + i;
                i = end + 1;
            }
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
                i += 1;
            }
            _ => return None,
        }
        params.push(params_str[start..i].to_string());
    }

    if ret.is_empty() {
        return None;
    }
    Some((params, ret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_to_dotted() {
        assert_eq!(signature_to_dotted("Ljava/awt/Window;"), "java.awt.Window");
        assert_eq!(signature_to_dotted("I"), "int");
        assert_eq!(signature_to_dotted("[I"), "int[]");
        assert_eq!(
            signature_to_dotted("[Ljava/lang/String;"),
            "java.lang.String[]"
        );
    }

    #[test]
    fn test_dotted_to_signature() {
        assert_eq!(
            dotted_to_signature("uiscope.agent.awt.AwtAgent"),
            "Luiscope/agent/awt/AwtAgent;"
        );
    }

    #[test]
    fn test_simple_and_package() {
        assert_eq!(simple_name("java.awt.event.ActionListener"), "ActionListener");
        assert_eq!(package_of("java.awt.event.ActionListener"), "java.awt.event");
        assert_eq!(simple_name("Lonely"), "Lonely");
        assert_eq!(package_of("Lonely"), "");
    }

    #[test]
    fn test_parse_method_signature() {
        let (params, ret) =
            parse_method_signature("(Ljava/awt/event/ActionListener;)V").unwrap();
        assert_eq!(params, vec!["Ljava/awt/event/ActionListener;"]);
        assert_eq!(ret, "V");

        let (params, ret) = parse_method_signature("(Ljava/lang/String;[BII)Ljava/lang/Class;").unwrap();
        assert_eq!(
            params,
            vec!["Ljava/lang/String;", "[B", "I", "I"]
        );
        assert_eq!(ret, "Ljava/lang/Class;");

        let (params, ret) = parse_method_signature("()[I").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret, "[I");

        assert!(parse_method_signature("Ljava/lang/String;").is_none());
        assert!(parse_method_signature("(Q)V").is_none());
    }
}
