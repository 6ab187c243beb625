use std::collections::{BTreeMap, HashSet};

use crate::{domain::task::TaskDescription, error::ModelError};

/// Order the tasks `root` transitively requires, dependencies first, `root` last.
///
/// Several descriptions may share a name (one per plugin); their requirements are merged.
pub fn dependency_order(tasks: &[TaskDescription], root: &str) -> Result<Vec<String>, ModelError> {
    let mut graph: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for t in tasks {
        graph
            .entry(t.name.as_str())
            .or_default()
            .extend(t.requires.iter().map(String::as_str));
    }

    let mut order = Vec::new();
    let mut done = HashSet::new();
    let mut visiting = Vec::new();
    visit(&graph, root, &mut visiting, &mut done, &mut order)?;
    Ok(order)
}

fn visit<'a>(
    graph: &BTreeMap<&'a str, Vec<&'a str>>,
    name: &'a str,
    visiting: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), ModelError> {
    if done.contains(name) {
        return Ok(());
    }
    if visiting.contains(&name) {
        let mut cycle: Vec<&str> = visiting
            .iter()
            .skip_while(|n| **n != name)
            .copied()
            .collect();
        cycle.push(name);
        return Err(ModelError::Cycle(cycle.join(" -> ")));
    }
    let Some(requires) = graph.get(name) else {
        return Err(ModelError::UnknownTask(name.to_string()));
    };

    visiting.push(name);
    for dep in requires {
        visit(graph, dep, visiting, done, order)?;
    }
    visiting.pop();

    done.insert(name);
    order.push(name.to_string());
    Ok(())
}
