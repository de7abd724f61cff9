use gdb_mi_bridge::{BreakpointSnapshot, VariableNode};

pub fn print_breakpoints(breakpoints: &[BreakpointSnapshot]) {
    if breakpoints.is_empty() {
        println!("no breakpoints");
        return;
    }
    println!("  id  enb  address             hits  where");
    for bp in breakpoints {
        let place = if bp.is_pending() {
            "<pending>".to_string()
        } else if bp.file.is_empty() {
            bp.function.clone()
        } else {
            format!("{} at {}:{}", bp.function, bp.file, bp.line)
        };
        println!(
            "  {:>2}  {:<3}  {:<18}  {:>4}  {}",
            bp.id,
            if bp.enabled { "y" } else { "n" },
            bp.address.to_string(),
            bp.hits,
            place
        );
        if bp.ignore_count > 0 {
            println!("      ignore next {} hits", bp.ignore_count);
        }
        if !bp.condition.is_empty() {
            println!("      stop only if {}", bp.condition);
        }
    }
}

pub fn print_variable(node: &VariableNode) {
    let mut out = String::new();
    render_variable(node, 0, &mut out);
    print!("{out}");
}

fn render_variable(node: &VariableNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let value = node.value.as_deref().unwrap_or("<unavailable>");
    if node.type_name.is_empty() {
        out.push_str(&format!("{indent}{} = {value}\n", node.name));
    } else {
        out.push_str(&format!(
            "{indent}{} ({}) = {value}\n",
            node.name, node.type_name
        ));
    }
    for child in node.children.iter().flatten() {
        render_variable(child, depth + 1, out);
    }
}
