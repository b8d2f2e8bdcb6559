//! Minimal element tree built on top of the `xmlparser` tokenizer.

use xmlparser::{ElementEnd, Token, Tokenizer};

use super::XmlRpcError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Element {
    pub(crate) name: String,
    pub(crate) children: Vec<Element>,
    pub(crate) text: String,
}

impl Element {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|child| child.name == name)
    }

    pub(crate) fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub(crate) fn expect_child(&self, name: &str) -> Result<&Self, XmlRpcError> {
        self.child(name).ok_or_else(|| XmlRpcError::MissingElement {
            parent: self.name.clone(),
            expected: name.to_owned(),
        })
    }
}

/// Parses `input` into a single root element.
pub(crate) fn parse(input: &str) -> Result<Element, XmlRpcError> {
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    for token in Tokenizer::from(input) {
        match token? {
            Token::ElementStart { local, .. } => {
                if root.is_some() {
                    return Err(XmlRpcError::Malformed(String::from(
                        "content after the root element",
                    )));
                }
                stack.push(Element::named(local.as_str()));
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {}
                ElementEnd::Empty => close(&mut stack, &mut root, None)?,
                ElementEnd::Close(_, local) => close(&mut stack, &mut root, Some(local.as_str()))?,
            },
            Token::Text { text } => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&unescape(text.as_str())?);
                }
            }
            Token::Cdata { text, .. } => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text.as_str());
                }
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlRpcError::Malformed(String::from("unclosed element")));
    }
    root.ok_or_else(|| XmlRpcError::Malformed(String::from("document has no root element")))
}

fn close(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    closing: Option<&str>,
) -> Result<(), XmlRpcError> {
    let element = stack
        .pop()
        .ok_or_else(|| XmlRpcError::Malformed(String::from("unbalanced closing tag")))?;
    if let Some(name) = closing
        && name != element.name
    {
        return Err(XmlRpcError::Malformed(format!(
            "expected </{}> but found </{name}>",
            element.name
        )));
    }
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
    Ok(())
}

/// Replaces the predefined entities and character references in `raw`.
pub(crate) fn unescape(raw: &str) -> Result<String, XmlRpcError> {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        let (before, from_amp) = rest.split_at(start);
        output.push_str(before);
        let end = from_amp
            .find(';')
            .ok_or_else(|| XmlRpcError::Malformed(format!("unterminated entity in '{raw}'")))?;
        let (entity, after) = from_amp.split_at(end);
        output.push(decode_entity(entity.trim_start_matches('&'))?);
        rest = after.get(1..).unwrap_or_default();
    }
    output.push_str(rest);
    Ok(output)
}

fn decode_entity(entity: &str) -> Result<char, XmlRpcError> {
    let decoded = match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        other => other.strip_prefix('#').and_then(|reference| {
            let code = match reference.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => reference.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
        }),
    };
    decoded.ok_or_else(|| XmlRpcError::Malformed(format!("unknown entity '&{entity};'")))
}

/// Escapes text for inclusion in element content.
pub(crate) fn escape(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    for character in raw.chars() {
        match character {
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '&' => output.push_str("&amp;"),
            other => output.push(other),
        }
    }
    output
}
