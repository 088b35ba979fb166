//! Filter graph assembled as a list of labeled nodes, then serialized (§9 design note): this
//! makes unit testing trivial (compare node lists) and removes shell-quoting concerns, since
//! the final string is built once, right before handing it to the encoder subprocess.

/// One `name=param1:param2` filter with explicit input/output labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub inputs: Vec<String>,
    pub filter: String,
    pub outputs: Vec<String>,
}

impl FilterNode {
    pub fn new(inputs: Vec<String>, filter: impl Into<String>, outputs: Vec<String>) -> Self {
        Self {
            inputs,
            filter: filter.into(),
            outputs,
        }
    }

    fn render(&self) -> String {
        let inputs: String = self.inputs.iter().map(|l| format!("[{l}]")).collect();
        let outputs: String = self.outputs.iter().map(|l| format!("[{l}]")).collect();
        format!("{inputs}{}{outputs}", self.filter)
    }
}

/// An ordered list of filter nodes, serialized as a single semicolon-separated
/// `-filter_complex` string (§4.5 step 7).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    pub nodes: Vec<FilterNode>,
}

impl FilterGraph {
    pub fn push(&mut self, node: FilterNode) {
        self.nodes.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn render(&self) -> String {
        self.nodes
            .iter()
            .map(FilterNode::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}
