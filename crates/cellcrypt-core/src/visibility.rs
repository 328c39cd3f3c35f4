//! Boolean visibility expressions over named attributes.
//!
//! Grammar: terms joined by `&` or `|`, grouped with parentheses. Unquoted
//! terms use `[A-Za-z0-9_\-.:/]`; quoted terms may hold any bytes, with `"`
//! and `\` escaped by a backslash. `&` and `|` cannot be mixed at one level.

use std::collections::BTreeSet;
use std::mem;

use crate::error::CryptoError;

/// A node of a parsed expression. Terms are spans into the expression text,
/// quotes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityNode {
    Term { start: usize, end: usize },
    And(Vec<VisibilityNode>),
    Or(Vec<VisibilityNode>),
}

impl VisibilityNode {
    pub fn children(&self) -> &[VisibilityNode] {
        match self {
            VisibilityNode::Term { .. } => &[],
            VisibilityNode::And(children) | VisibilityNode::Or(children) => children,
        }
    }

    pub fn is_term(&self) -> bool {
        matches!(self, VisibilityNode::Term { .. })
    }

    fn into_children(self) -> Vec<VisibilityNode> {
        match self {
            VisibilityNode::And(children) | VisibilityNode::Or(children) => children,
            term => vec![term],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    And,
    Or,
}

impl Operator {
    fn node(self, children: Vec<VisibilityNode>) -> VisibilityNode {
        match self {
            Operator::And => VisibilityNode::And(children),
            Operator::Or => VisibilityNode::Or(children),
        }
    }

    fn matches(self, node: &VisibilityNode) -> bool {
        matches!(
            (self, node),
            (Operator::And, VisibilityNode::And(_)) | (Operator::Or, VisibilityNode::Or(_))
        )
    }
}

/// A parsed visibility expression. The empty expression has no root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnVisibility {
    expression: Vec<u8>,
    root: Option<VisibilityNode>,
}

impl ColumnVisibility {
    pub fn parse(expression: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let expression = expression.into();
        let root = Parser::new(&expression).parse()?;
        Ok(Self { expression, root })
    }

    pub fn empty() -> Self {
        Self {
            expression: Vec::new(),
            root: None,
        }
    }

    pub fn expression(&self) -> &[u8] {
        &self.expression
    }

    pub fn root(&self) -> Option<&VisibilityNode> {
        self.root.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Raw term bytes with surrounding quotes removed; escapes are kept.
    pub fn term(&self, node: &VisibilityNode) -> Option<&[u8]> {
        match *node {
            VisibilityNode::Term { start, end } => {
                let span = &self.expression[start..end];
                if span.first() == Some(&b'"') && span.len() >= 2 {
                    Some(&span[1..span.len() - 1])
                } else {
                    Some(span)
                }
            }
            _ => None,
        }
    }

    /// The unescaped attribute name of a term node.
    pub fn attribute(&self, node: &VisibilityNode) -> Result<Vec<u8>, CryptoError> {
        let term = self.term(node).ok_or_else(|| {
            CryptoError::InvalidArgument("attribute requested for a non-term node".to_string())
        })?;
        unescape(term)
    }

    /// Render a node back to expression text, adding parentheses only where
    /// a child's operator differs from its parent's.
    pub fn stringify(&self, node: &VisibilityNode) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.expression.len());
        self.stringify_into(node, &mut out);
        out
    }

    fn stringify_into(&self, node: &VisibilityNode, out: &mut Vec<u8>) {
        let separator = match node {
            VisibilityNode::Term { start, end } => {
                out.extend_from_slice(&self.expression[*start..*end]);
                return;
            }
            VisibilityNode::And(_) => b'&',
            VisibilityNode::Or(_) => b'|',
        };

        for (idx, child) in node.children().iter().enumerate() {
            if idx > 0 {
                out.push(separator);
            }
            let parens = !child.is_term() && mem::discriminant(child) != mem::discriminant(node);
            if parens {
                out.push(b'(');
            }
            self.stringify_into(child, out);
            if parens {
                out.push(b')');
            }
        }
    }

    /// Whether the authorizations satisfy the expression. Empty is always visible.
    pub fn evaluate(&self, authorizations: &Authorizations) -> Result<bool, CryptoError> {
        match &self.root {
            None => Ok(true),
            Some(root) => self.evaluate_node(root, authorizations),
        }
    }

    fn evaluate_node(
        &self,
        node: &VisibilityNode,
        authorizations: &Authorizations,
    ) -> Result<bool, CryptoError> {
        match node {
            VisibilityNode::Term { .. } => Ok(authorizations.contains(&self.attribute(node)?)),
            VisibilityNode::And(children) => {
                for child in children {
                    if !self.evaluate_node(child, authorizations)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            VisibilityNode::Or(children) => {
                for child in children {
                    if self.evaluate_node(child, authorizations)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// A set of attribute names held by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorizations(BTreeSet<Vec<u8>>);

impl Authorizations {
    pub fn new<I, T>(authorizations: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self(authorizations.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, authorization: &[u8]) -> bool {
        self.0.contains(authorization)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }
}

pub fn is_valid_auth_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b':' | b'/')
}

/// Backslash-escape `"` and `\`, wrapping the result in quotes when `quote` is set.
pub fn escape(bytes: &[u8], quote: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    if quote {
        out.push(b'"');
    }
    for &byte in bytes {
        if byte == b'"' || byte == b'\\' {
            out.push(b'\\');
        }
        out.push(byte);
    }
    if quote {
        out.push(b'"');
    }
    out
}

/// Quote a term only when it contains characters outside the unquoted set.
pub fn quote(term: &[u8]) -> Vec<u8> {
    if !term.is_empty() && term.iter().all(|&b| is_valid_auth_char(b)) {
        term.to_vec()
    } else {
        escape(term, true)
    }
}

/// Reverse of [`escape`] without quotes.
pub fn unescape(term: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(term.len());
    let mut bytes = term.iter().copied();
    while let Some(byte) = bytes.next() {
        match byte {
            b'\\' => match bytes.next() {
                Some(escaped @ (b'"' | b'\\')) => out.push(escaped),
                _ => {
                    return Err(CryptoError::Malformed(
                        "illegal escape sequence in term".to_string(),
                    ))
                }
            },
            b'"' => {
                return Err(CryptoError::Malformed(
                    "unescaped quote in term".to_string(),
                ))
            }
            _ => out.push(byte),
        }
    }
    Ok(out)
}

/// Parenthesis depth past which parsing fails instead of recursing further.
pub const MAX_NESTING_DEPTH: usize = 100;

struct Parser<'a> {
    expression: &'a [u8],
    index: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a [u8]) -> Self {
        Self {
            expression,
            index: 0,
            depth: 0,
        }
    }

    fn error(&self, message: &'static str, position: usize) -> CryptoError {
        CryptoError::InvalidVisibility { message, position }
    }

    fn parse(mut self) -> Result<Option<VisibilityNode>, CryptoError> {
        if self.expression.is_empty() {
            return Ok(None);
        }
        let node = self.parse_group()?;
        if self.depth != 0 || self.index != self.expression.len() {
            return Err(self.error("parenthesis mis-match", self.index));
        }
        Ok(Some(node))
    }

    fn term(
        &self,
        start: usize,
        end: usize,
        group: Option<VisibilityNode>,
    ) -> Result<VisibilityNode, CryptoError> {
        match (start != end, group) {
            (true, Some(_)) => Err(self.error("expression needs & or |", start)),
            (true, None) => Ok(VisibilityNode::Term { start, end }),
            (false, Some(group)) => Ok(group),
            (false, None) => Err(self.error("empty term", start)),
        }
    }

    fn join(
        &self,
        result: &mut Option<(Operator, Vec<VisibilityNode>)>,
        operator: Operator,
        child: VisibilityNode,
        position: usize,
    ) -> Result<(), CryptoError> {
        match result {
            Some((current, children)) => {
                if *current != operator {
                    return Err(self.error("cannot mix & and |", position));
                }
                children.push(child);
            }
            None => *result = Some((operator, vec![child])),
        }
        Ok(())
    }

    fn parse_group(&mut self) -> Result<VisibilityNode, CryptoError> {
        let mut result: Option<(Operator, Vec<VisibilityNode>)> = None;
        let mut group: Option<VisibilityNode> = None;
        let mut subterm_start = self.index;
        let mut subterm_complete = false;

        while self.index < self.expression.len() {
            let position = self.index;
            let byte = self.expression[position];
            self.index += 1;

            match byte {
                b'&' | b'|' => {
                    let operator = if byte == b'&' {
                        Operator::And
                    } else {
                        Operator::Or
                    };
                    let child = self.term(subterm_start, position, group.take())?;
                    self.join(&mut result, operator, child, position)?;
                    subterm_start = self.index;
                    subterm_complete = false;
                }
                b'(' => {
                    if subterm_start != position || group.is_some() {
                        return Err(self.error("expression needs & or |", position));
                    }
                    if self.depth >= MAX_NESTING_DEPTH {
                        return Err(self.error("expression too deeply nested", position));
                    }
                    self.depth += 1;
                    group = Some(self.parse_group()?);
                    subterm_start = self.index;
                    subterm_complete = false;
                }
                b')' => {
                    if self.depth == 0 {
                        return Err(self.error("parenthesis mis-match", position));
                    }
                    self.depth -= 1;
                    let child = self.term(subterm_start, position, group.take())?;
                    return Ok(match result {
                        None => child,
                        Some((operator, mut children)) => {
                            // A trailing group with the same operator merges into this one.
                            if operator.matches(&child) {
                                children.extend(child.into_children());
                            } else {
                                children.push(child);
                            }
                            operator.node(children)
                        }
                    });
                }
                b'"' => {
                    if subterm_start != position {
                        return Err(self.error("expression needs & or |", position));
                    }
                    while self.index < self.expression.len() && self.expression[self.index] != b'"'
                    {
                        if self.expression[self.index] == b'\\' {
                            self.index += 1;
                            match self.expression.get(self.index) {
                                Some(b'\\') | Some(b'"') => {}
                                _ => {
                                    return Err(
                                        self.error("invalid escaping within quotes", self.index)
                                    )
                                }
                            }
                        }
                        self.index += 1;
                    }
                    if self.index == self.expression.len() {
                        return Err(self.error("unclosed quote", subterm_start));
                    }
                    if subterm_start + 1 == self.index {
                        return Err(self.error("empty term", subterm_start));
                    }
                    self.index += 1;
                    subterm_complete = true;
                }
                _ => {
                    if subterm_complete {
                        return Err(self.error("expression needs & or |", position));
                    }
                    if !is_valid_auth_char(byte) {
                        return Err(self.error("bad character", position));
                    }
                }
            }
        }

        let end = self.index;
        let child = self.term(subterm_start, end, group.take())?;
        match result {
            None => Ok(child),
            Some((operator, mut children)) => {
                children.push(child);
                Ok(operator.node(children))
            }
        }
    }
}
