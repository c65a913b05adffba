//! The live concrete syntax tree.
//!
//! Nodes are appended while notes are still being held: a note-on lands as a
//! child of the tail when the tail is held, as a sibling otherwise. Each
//! node carries monotone exclusion flags recording the syntactic roles it
//! has been disqualified from; the disambiguator later reads only those
//! flags and the tree shape.

pub type NodeId = usize;

#[derive(Debug)]
pub struct CstNode {
    pub parent: Option<NodeId>,
    pub child: Option<NodeId>,
    pub sibling: Option<NodeId>,
    pub note: u8,
    pub held: bool,
    pub outlives_ancestor: bool,
    pub excl_bass: bool,
    pub excl_chord: bool,
    pub excl_melody: bool,
    pub excl_staccato: bool,
}

impl CstNode {
    fn new(note: u8) -> Self {
        Self {
            parent: None,
            child: None,
            sibling: None,
            note,
            held: true,
            outlives_ancestor: false,
            excl_bass: false,
            excl_chord: false,
            excl_melody: false,
            excl_staccato: false,
        }
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn has_sibling(&self) -> bool {
        self.sibling.is_some()
    }
}

#[derive(Debug, Default)]
pub struct Cst {
    nodes: Vec<CstNode>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
}

impl Cst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn node(&self, id: NodeId) -> &CstNode {
        &self.nodes[id]
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn note_on(&mut self, note: u8) {
        let id = self.nodes.len();
        self.nodes.push(CstNode::new(note));

        if let Some(tail) = self.tail {
            if self.nodes[tail].held {
                // Attach as child of the held tail.
                self.nodes[id].parent = Some(tail);
                self.nodes[tail].child = Some(id);

                // A note-on arrived while the tail was held, so the tail
                // cannot be staccato.
                self.nodes[tail].excl_staccato = true;

                if self.nodes[tail].outlives_ancestor {
                    // Inside a melody: exclude the chord role on the new
                    // node and up the released ancestor run.
                    self.nodes[id].excl_chord = true;
                    self.nodes[tail].excl_chord = true;
                    let mut ancestor = self.nodes[tail].parent;
                    while let Some(a) = ancestor {
                        if self.nodes[a].held {
                            break;
                        }
                        self.nodes[a].excl_chord = true;
                        ancestor = self.nodes[a].parent;
                    }
                }

                if let Some(grandparent) = self.nodes[tail].parent {
                    if self.nodes[grandparent].held {
                        // Three simultaneous holds: melody excluded.
                        self.nodes[grandparent].excl_melody = true;
                    }
                }
            } else {
                // Attach as sibling of the released tail.
                let parent = self.nodes[tail].parent;
                self.nodes[id].parent = parent;
                self.nodes[tail].sibling = Some(id);

                if let Some(p) = parent {
                    // A melody node cannot have more than one child.
                    self.nodes[p].excl_melody = true;
                }
            }
        }

        if self.head.is_none() {
            self.head = Some(id);
        }
        self.tail = Some(id);
    }

    pub fn note_off(&mut self, note: u8) {
        let Some(tail) = self.tail else {
            return;
        };

        // Ascend from the tail to the matching pitch, marking held
        // intermediates as outliving their ancestor.
        let mut all_children_off = true;
        let mut cursor = tail;
        while self.nodes[cursor].note != note {
            if self.nodes[cursor].held {
                all_children_off = false;
                self.nodes[cursor].outlives_ancestor = true;
                self.nodes[cursor].excl_bass = true;
                self.nodes[cursor].excl_staccato = true;
            }
            match self.nodes[cursor].parent {
                Some(p) => cursor = p,
                None => return,
            }
        }

        self.nodes[cursor].held = false;

        if !self.nodes[cursor].has_child() || !all_children_off {
            // A bass must have children and must not be outlived by them.
            self.nodes[cursor].excl_bass = true;
        }

        if all_children_off {
            if !self.nodes[cursor].outlives_ancestor || self.nodes[cursor].has_child() {
                // A melody node must outlive an ancestor or a child.
                self.nodes[cursor].excl_melody = true;
            }

            // Reset the tail to the nearest still-held ancestor.
            let mut t = tail;
            while let Some(p) = self.nodes[t].parent {
                if self.nodes[p].held {
                    break;
                }
                t = p;
            }
            self.tail = Some(t);
        }
    }
}
