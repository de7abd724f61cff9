//! Expression evaluation and lazy expansion of compound values.
//!
//! Values come back from gdb as display strings. Compound values (structs,
//! arrays, non-null pointers) are expanded through a short-lived gdb
//! variable object: created, its children listed, then deleted again.

use crate::{
    error::Result,
    host::ThreadId,
    mi::parser::mi_escape,
    session::SessionCoordinator,
    transport::Transport,
};

const EVAL_OK: &str = "60";
const ERROR_REPLY: &str = "ERROR";
const NULL_POINTER: &str = "0x0";
/// Escaped NUL gdb prints after the terminator of a char array.
const GARBAGE_MARKER: &str = r"\\000";
/// gdb refuses some variable object names (leading `_` and friends).
pub const VAR_PREFIX: &str = "vo_";
const ACCESS_LEVELS: [&str; 3] = ["private", "public", "protected"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub valid: bool,
    /// The value, or gdb's error text when `valid` is false.
    pub value: String,
}

fn evaluate_command(expression: &str) -> String {
    format!("-data-evaluate-expression {}", mi_escape(expression))
}

/// Evaluates `name`, retrying with `gdb_name` when gdb rejects it.
pub fn evaluate_expression(
    transport: &dyn Transport,
    name: &str,
    gdb_name: Option<&str>,
) -> Result<Evaluation> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Ok(Evaluation {
            valid: false,
            value: String::new(),
        });
    }

    let mut response = transport.request(&evaluate_command(name))?;
    if !response.starts_with(EVAL_OK) {
        if let Some(gdb_name) = gdb_name {
            let retry = transport.request(&evaluate_command(gdb_name))?;
            if retry.starts_with(EVAL_OK) {
                response = retry;
            }
        }
    }

    let valid = response.starts_with(EVAL_OK);
    let body = response.get(3..).unwrap_or_default();
    let body = body
        .strip_prefix('"')
        .and_then(|b| b.strip_suffix('"'))
        .unwrap_or(body);
    let value = body.replace("\\\"", "\"");
    let value = if valid {
        strip_string_garbage(&value)
    } else {
        value
    };
    Ok(Evaluation { valid, value })
}

/// Cuts everything from an escaped NUL to the closing quote of each quoted
/// string in `value`. Text outside quotes is left alone.
pub fn strip_string_garbage(value: &str) -> String {
    let mut s = value.to_string();
    let mut marker = s.find(GARBAGE_MARKER);
    let mut from = 0;
    while let Some(mut at) = marker {
        let Some(open) = unescaped_quote(&s, from) else {
            break;
        };
        let Some(close) = unescaped_quote(&s, open + 1) else {
            break;
        };
        while at < open {
            match find_from(&s, GARBAGE_MARKER, at + 1) {
                Some(next) => at = next,
                None => return s,
            }
        }
        if at < close {
            s.replace_range(at..close, "");
            marker = find_from(&s, GARBAGE_MARKER, at);
            from = at + 1;
        } else {
            marker = Some(at);
            from = close + 1;
        }
    }
    s
}

fn find_from(s: &str, pattern: &str, from: usize) -> Option<usize> {
    s.get(from..)?.find(pattern).map(|i| from + i)
}

fn unescaped_quote(s: &str, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut at = from;
    loop {
        let pos = find_from(s, "\"", at)?;
        if pos == 0 || bytes[pos - 1] != b'\\' {
            return Some(pos);
        }
        at = pos + 1;
    }
}

/// Shape of a type as far as child naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralKind {
    Scalar,
    Pointer,
    Struct,
    StructPointer,
    StructArray,
    Array,
}

impl StructuralKind {
    pub fn of(type_name: &str) -> StructuralKind {
        let is_struct = type_name.contains("struct");
        let is_pointer = type_name.ends_with('*');
        let is_array = type_name.contains('[');
        match (is_struct, is_pointer, is_array) {
            (true, true, _) => StructuralKind::StructPointer,
            (true, false, true) => StructuralKind::StructArray,
            (true, false, false) => StructuralKind::Struct,
            (false, _, true) => StructuralKind::Array,
            (false, true, false) => StructuralKind::Pointer,
            (false, false, false) => StructuralKind::Scalar,
        }
    }

    /// Rewrites the last `.field` of a child name with this parent's combinator.
    fn join(self, name: &str) -> String {
        let Some(dot) = name.rfind('.') else {
            return name.to_string();
        };
        let (parent, field) = (&name[..dot], &name[dot + 1..]);
        match self {
            StructuralKind::Pointer | StructuralKind::StructPointer => format!("{parent}->{field}"),
            StructuralKind::Array | StructuralKind::StructArray => format!("{parent}[{field}]"),
            StructuralKind::Struct | StructuralKind::Scalar => name.to_string(),
        }
    }
}

/// A variable, field, element or free expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableNode {
    /// IDE-facing name: `p->next`, `a[2]`, `*(p)`, `x.field`.
    pub name: String,
    /// Name gdb knows the node by when it differs from `name`.
    pub gdb_name: Option<String>,
    pub type_name: String,
    /// `None` until evaluated.
    pub value: Option<String>,
    /// `None` until expansion was attempted; `Some(empty)` means expandable
    /// but not listed yet, or no children found.
    pub children: Option<Vec<VariableNode>>,
}

impl VariableNode {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&VariableNode> {
        self.children.as_ref()?.iter().find(|c| c.name == name)
    }

    fn child_position(&self, name: &str) -> Option<usize> {
        self.children.as_ref()?.iter().position(|c| c.name == name)
    }
}

fn needs_expansion(type_name: &str, value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(value) => type_name.contains('*') && value != NULL_POINTER,
    }
}

fn needs_reevaluation(value: &str) -> bool {
    value.is_empty()
        || value.contains("{...}")
        || (value.len() >= 2 && value.starts_with('[') && value.ends_with(']'))
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Local,
    Argument,
}

#[derive(Debug, Clone)]
struct NodePath {
    scope: Scope,
    root: usize,
    children: Vec<usize>,
}

/// Variables of one stack frame. Lookups try locals before arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameVariables {
    pub locals: Vec<VariableNode>,
    pub arguments: Vec<VariableNode>,
}

impl FrameVariables {
    pub fn find(&self, name: &str) -> Option<&VariableNode> {
        self.locate(name).and_then(|at| self.node(&at))
    }

    fn roots(&self, scope: Scope) -> &Vec<VariableNode> {
        match scope {
            Scope::Local => &self.locals,
            Scope::Argument => &self.arguments,
        }
    }

    fn locate(&self, name: &str) -> Option<NodePath> {
        [Scope::Local, Scope::Argument].into_iter().find_map(|scope| {
            self.roots(scope)
                .iter()
                .position(|v| v.name == name)
                .map(|root| NodePath {
                    scope,
                    root,
                    children: Vec::new(),
                })
        })
    }

    fn node(&self, at: &NodePath) -> Option<&VariableNode> {
        at.children
            .iter()
            .try_fold(self.roots(at.scope).get(at.root)?, |node, &i| {
                node.children.as_ref()?.get(i)
            })
    }

    fn node_mut(&mut self, at: &NodePath) -> Option<&mut VariableNode> {
        let roots = match at.scope {
            Scope::Local => &mut self.locals,
            Scope::Argument => &mut self.arguments,
        };
        let mut node = roots.get_mut(at.root)?;
        for &i in &at.children {
            node = node.children.as_mut()?.get_mut(i)?;
        }
        Some(node)
    }
}

/// A gdb variable object created for one expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VarObject {
    name: String,
    children: u32,
    prefixed: bool,
}

/// Maps synthetic gdb child names back to the IDE name of their owner.
#[derive(Debug, Default)]
struct NameMap {
    entries: Vec<(String, String)>,
}

impl NameMap {
    fn bind(&mut self, gdb_name: &str, display: &str) {
        match self.entries.iter_mut().find(|(_, d)| d == display) {
            Some(entry) => entry.0 = gdb_name.to_string(),
            None => self
                .entries
                .push((gdb_name.to_string(), display.to_string())),
        }
    }

    fn display_for(&self, gdb_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(g, _)| g == gdb_name)
            .map(|(_, d)| d.as_str())
    }
}

/// `x.public` and friends: a level gdb inserts for C++ access specifiers.
fn is_access_level(name: &str) -> bool {
    let name = name.strip_suffix('"').unwrap_or(name);
    let name = name.strip_suffix('.').unwrap_or(name);
    ACCESS_LEVELS.iter().any(|level| {
        name.len() > level.len() + 1
            && name.ends_with(level)
            && name.as_bytes()[name.len() - level.len() - 1] == b'.'
    })
}

/// IDE name of a listed child.
fn display_name(raw: &str, parent: StructuralKind, names: &NameMap) -> String {
    let mut name = raw.to_string();
    if let Some(dot) = name.rfind('.') {
        if let Some(display) = names.display_for(&name[..dot]) {
            name = format!("{display}{}", &name[dot..]);
        }
    }
    name = name
        .split('.')
        .filter(|segment| !ACCESS_LEVELS.contains(segment))
        .collect::<Vec<_>>()
        .join(".");
    if let Some(deref) = name.rfind(".*") {
        name = format!("*({})", &name[..deref]);
    }
    parent.join(&name)
}

/// Resolves expressions and expands children against one gdb.
pub struct VariableResolver<'a> {
    transport: &'a dyn Transport,
    max_children: u32,
}

impl<'a> VariableResolver<'a> {
    pub fn new(transport: &'a dyn Transport, max_children: u32) -> Self {
        Self {
            transport,
            max_children,
        }
    }

    pub fn for_session(session: &'a SessionCoordinator) -> Self {
        Self::new(session.transport(), session.config().max_children)
    }

    pub fn evaluate(&self, expression: &str) -> Result<Evaluation> {
        evaluate_expression(self.transport, expression, None)
    }

    /// Locals and arguments of `frame` on `thread`, compound ones expanded.
    pub fn frame_variables(&self, thread: ThreadId, frame: u32) -> Result<FrameVariables> {
        let response = self.transport.request(&format!(
            "-stack-list-variables --thread {thread} --frame {frame} --simple-values"
        ))?;
        let mut vars = FrameVariables::default();
        if response == ERROR_REPLY {
            return Ok(vars);
        }
        for entry in response.get(3..).unwrap_or_default().split('#') {
            let mut fields = entry.splitn(4, ';');
            let (Some(name), Some(argument), Some(type_name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let value = fields
                .next()
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let node = self.create(name, type_name, value)?;
            if argument == "1" {
                vars.arguments.push(node);
            } else {
                vars.locals.push(node);
            }
        }
        Ok(vars)
    }

    /// Node for a frame variable. Compound values are expanded right away.
    pub fn create(&self, name: &str, type_name: &str, value: Option<String>) -> Result<VariableNode> {
        self.build(name, type_name, "", value)
    }

    /// Resolves a dotted, bracketed or arrow path. Known variables and
    /// already expanded children are reused and re-evaluated; anything else
    /// is evaluated as a free expression.
    pub fn get(&self, path: &str, frame: &mut FrameVariables) -> Result<VariableNode> {
        let mut rest = path;
        let mut search = String::new();
        let mut separator = String::new();
        let mut is_root = true;
        let mut found: Option<NodePath> = None;

        loop {
            let stop = [rest.find('.'), rest.find('['), rest.find("->")]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(rest.len());
            search.push_str(&separator);
            search.push_str(&rest[..stop]);
            separator.clear();

            let tail = &rest[stop..];
            if tail.starts_with("->") {
                separator.push_str("->");
                rest = &tail[2..];
            } else if tail.starts_with('[') {
                let close = tail.find(']').unwrap_or(tail.len() - 1);
                separator.push_str(&tail[..=close]);
                rest = &tail[close + 1..];
            } else if tail.starts_with('.') {
                separator.push('.');
                rest = &tail[1..];
            } else {
                rest = "";
            }

            found = match found {
                None => frame.locate(&search),
                Some(mut at) => {
                    is_root = false;
                    let child = frame.node(&at).and_then(|n| n.child_position(&search));
                    child.map(|i| {
                        at.children.push(i);
                        at
                    })
                }
            };
            if found.is_none() || (rest.is_empty() && separator.is_empty()) {
                break;
            }
        }

        // Not a known variable; the rest is part of an expression.
        search.push_str(&separator);
        search.push_str(rest);

        let node = match &found {
            Some(at) => frame.node_mut(at),
            None => None,
        };
        match node {
            Some(node) => {
                let eval = evaluate_expression(self.transport, &search, node.gdb_name.as_deref())?;
                if node.value.as_deref() != Some(eval.value.as_str()) || !is_root {
                    node.value = Some(eval.value);
                    if needs_expansion(&node.type_name, node.value.as_deref()) {
                        let shape = node.type_name.clone();
                        self.expand(node, &shape)?;
                    }
                }
                Ok(node.clone())
            }
            None => self.resolve_expression(&search),
        }
    }

    fn resolve_expression(&self, expression: &str) -> Result<VariableNode> {
        let eval = evaluate_expression(self.transport, expression, None)?;
        if !eval.valid {
            return Ok(VariableNode::new(expression, "", Some(eval.value)));
        }

        let compact = expression.replace(' ', "");
        let declared = self.transport.request(&format!("whatis {compact}"))?;
        let mut detailed = self.transport.request(&format!("ptype {compact}"))?;
        if let Some(trimmed) = detailed.strip_suffix(" {") {
            detailed = trimmed.to_string();
        }
        if detailed.len() < declared.len() && declared.contains(&detailed) {
            detailed = declared.clone();
        }
        if detailed == declared || (detailed.contains("::") && !detailed.contains("union")) {
            detailed.clear();
        }

        let shape = if detailed.is_empty() {
            &declared
        } else {
            &detailed
        };
        if shape.ends_with('*') {
            if eval.value == NULL_POINTER {
                Ok(VariableNode::new(expression, declared, Some(eval.value)))
            } else {
                self.build(expression, &declared, &detailed, Some(eval.value))
            }
        } else if shape.contains("struct") || shape.contains('[') {
            self.build(expression, &declared, &detailed, None)
        } else {
            Ok(VariableNode::new(expression, declared, Some(eval.value)))
        }
    }

    /// `detailed` is the resolved type used for the child shape, empty when
    /// `declared` already says everything.
    fn build(
        &self,
        name: &str,
        declared: &str,
        detailed: &str,
        value: Option<String>,
    ) -> Result<VariableNode> {
        let shape = if detailed.is_empty() {
            declared
        } else {
            detailed
        };
        let mut node = VariableNode::new(name, declared, value);
        if needs_expansion(shape, node.value.as_deref()) {
            self.expand(&mut node, shape)?;
        }
        if node.value.is_none() {
            node.value = Some(evaluate_expression(self.transport, name, None)?.value);
        }
        Ok(node)
    }

    fn expand(&self, node: &mut VariableNode, shape: &str) -> Result<()> {
        let Some(var) = self.create_var(&node.name)? else {
            return Ok(());
        };
        let mut names = NameMap::default();
        if var.prefixed {
            node.gdb_name = Some(var.name.clone());
            names.bind(&var.name, &node.name);
        }
        node.children = Some(Vec::new());
        if var.children > 0 {
            self.list_children(node, StructuralKind::of(shape), &mut names, var.prefixed, None)?;
        }
        self.delete_var(&var.name)
    }

    /// Creates a variable object, retrying under [`VAR_PREFIX`] when gdb
    /// rejects the plain name. `None` when both attempts fail.
    fn create_var(&self, name: &str) -> Result<Option<VarObject>> {
        for var_name in [name.to_string(), format!("{VAR_PREFIX}{name}")] {
            let response = self
                .transport
                .request(&format!("-var-create {var_name} \"*\" {name}"))?;
            if response != ERROR_REPLY {
                return Ok(Some(VarObject {
                    prefixed: var_name != name,
                    name: var_name,
                    children: response.trim().parse().unwrap_or(0),
                }));
            }
        }
        Ok(None)
    }

    fn delete_var(&self, var_name: &str) -> Result<()> {
        self.transport
            .request(&format!("-var-delete {var_name}"))
            .map(drop)
    }

    fn request_children(&self, var_name: &str) -> Result<String> {
        self.transport.request(&format!(
            "-var-list-children --all-values {var_name} 0 {}",
            self.max_children
        ))
    }

    fn list_children(
        &self,
        node: &mut VariableNode,
        parent: StructuralKind,
        names: &mut NameMap,
        prefixed: bool,
        via: Option<&str>,
    ) -> Result<()> {
        let response = match (via, node.gdb_name.clone()) {
            (Some(var_name), _) => self.request_children(var_name)?,
            (None, Some(gdb_name)) if prefixed => self.request_children(&gdb_name)?,
            (None, gdb_name) => {
                let response = self.request_children(&node.name)?;
                match gdb_name {
                    Some(gdb_name) if response == ERROR_REPLY => self.request_children(&gdb_name)?,
                    _ => response,
                }
            }
        };
        if response == ERROR_REPLY {
            return Ok(());
        }

        let body = response.get(3..).unwrap_or_default().replace("#;;;", "");
        for entry in body.split('#') {
            let fields: Vec<&str> = entry.split(';').collect();
            let raw_name = fields[0];
            if raw_name.is_empty() || raw_name.contains("::") {
                continue;
            }
            if is_access_level(raw_name) {
                names.bind(raw_name, &node.name);
                self.list_children(node, parent, names, prefixed, Some(raw_name))?;
                continue;
            }

            let name = display_name(raw_name, parent, names);
            let child_count: u32 = fields
                .get(1)
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0);
            let mut value = fields.get(2).copied().unwrap_or_default().to_string();
            let mut valid = true;
            if needs_reevaluation(&value) {
                let eval = evaluate_expression(self.transport, &name, Some(raw_name))?;
                valid = eval.valid;
                value = eval.value;
            }
            let type_name = fields.get(3).copied().unwrap_or_default();

            let expandable = valid && child_count > 0 && value != NULL_POINTER;
            let mut child = VariableNode::new(name, type_name, Some(value));
            child.gdb_name = Some(raw_name.to_string());
            if expandable {
                child.children = Some(Vec::new());
            }
            node.children.get_or_insert_with(Vec::new).push(child);
        }
        Ok(())
    }
}
