// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Mixing topology.
//!
//! Every node (a source or a bus) feeds at most one bus, and feeds it at most
//! once. That is checked across the whole graph, nested buses included, so a
//! source can never be summed into the output twice. [`MixGraph::connect`] is
//! the only way to add an edge.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

mod source;

pub use source::{BeatCounter, CallbackTrigger, Source, SourceId, Trigger};

/// Name of a mixing bus.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(String);

impl BusId {
    pub fn new(id: &str) -> Self {
        BusId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BusId {
    fn from(id: &str) -> Self {
        BusId::new(id)
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that can feed a bus.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeId {
    Source(SourceId),
    Bus(BusId),
}

impl From<SourceId> for NodeId {
    fn from(id: SourceId) -> Self {
        NodeId::Source(id)
    }
}

impl From<BusId> for NodeId {
    fn from(id: BusId) -> Self {
        NodeId::Bus(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Source(id) => write!(f, "{}", id),
            NodeId::Bus(id) => write!(f, "bus '{}'", id),
        }
    }
}

/// The connection topology: buses, their ordered inputs, and who owns each node.
#[derive(Clone, Debug, PartialEq)]
pub struct MixGraph {
    output: BusId,
    /// Ordered inputs of every bus.
    inputs: HashMap<BusId, Vec<NodeId>>,
    /// The bus each connected source feeds.
    source_owner: HashMap<SourceId, BusId>,
    /// The bus each connected bus feeds.
    bus_owner: HashMap<BusId, BusId>,
}

impl MixGraph {
    /// Creates a graph whose root is the bus named `output`.
    pub fn new(output: &str) -> Self {
        let output = BusId::new(output);
        let mut inputs = HashMap::new();
        inputs.insert(output.clone(), Vec::new());
        Self {
            output,
            inputs,
            source_owner: HashMap::new(),
            bus_owner: HashMap::new(),
        }
    }

    pub fn output(&self) -> &BusId {
        &self.output
    }

    pub fn add_bus(&mut self, id: &str) -> Result<()> {
        let id = BusId::new(id);
        if self.inputs.contains_key(&id) {
            return Err(Error::Conflict { id: id.0 });
        }
        self.inputs.insert(id, Vec::new());
        Ok(())
    }

    pub fn has_bus(&self, id: &str) -> bool {
        self.inputs.contains_key(&BusId::new(id))
    }

    /// The ordered inputs of `bus`. Unknown buses have none.
    pub fn inputs(&self, bus: &BusId) -> &[NodeId] {
        self.inputs.get(bus).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The bus `node` feeds, if any.
    pub fn owner(&self, node: &NodeId) -> Option<&BusId> {
        match node {
            NodeId::Source(id) => self.source_owner.get(id),
            NodeId::Bus(id) => self.bus_owner.get(id),
        }
    }

    /// Connects `node` into `bus`.
    ///
    /// Fails if the node already feeds any bus, if the bus is unknown, or if
    /// the edge would create a cycle or route the output bus somewhere.
    /// A failed connect leaves the graph unchanged.
    pub fn connect(&mut self, node: impl Into<NodeId>, bus: &str) -> Result<()> {
        let node = node.into();
        let bus = BusId::new(bus);
        if !self.inputs.contains_key(&bus) {
            return Err(Error::not_found("bus", bus.0));
        }
        if let Some(current) = self.owner(&node) {
            return Err(Error::AlreadyConnected {
                node: node.to_string(),
                bus: current.to_string(),
            });
        }

        match &node {
            NodeId::Source(id) => {
                self.source_owner.insert(*id, bus.clone());
            }
            NodeId::Bus(child) => {
                if !self.inputs.contains_key(child) {
                    return Err(Error::not_found("bus", child.as_str()));
                }
                if *child == self.output {
                    return Err(Error::InvalidRoute(format!(
                        "output bus '{}' cannot feed another bus",
                        child
                    )));
                }
                if self.feeds_into(&bus, child) {
                    return Err(Error::InvalidRoute(format!(
                        "connecting bus '{}' into '{}' would create a cycle",
                        child, bus
                    )));
                }
                self.bus_owner.insert(child.clone(), bus.clone());
            }
        }

        if let Some(inputs) = self.inputs.get_mut(&bus) {
            inputs.push(node);
        }
        Ok(())
    }

    /// Removes `node` from whatever bus it feeds. Returns whether it was connected.
    /// A disconnected bus keeps its own inputs.
    pub fn disconnect(&mut self, node: impl Into<NodeId>) -> bool {
        let node = node.into();
        let owner = match &node {
            NodeId::Source(id) => self.source_owner.remove(id),
            NodeId::Bus(id) => self.bus_owner.remove(id),
        };
        let Some(owner) = owner else {
            return false;
        };
        if let Some(inputs) = self.inputs.get_mut(&owner) {
            inputs.retain(|input| *input != node);
        }
        true
    }

    /// Whether `bus` is `target` or sits downstream of it.
    fn feeds_into(&self, bus: &BusId, target: &BusId) -> bool {
        let mut current = bus;
        loop {
            if current == target {
                return true;
            }
            match self.bus_owner.get(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Whether `source` reaches the output bus. Does not allocate.
    pub fn is_routed(&self, source: SourceId) -> bool {
        let Some(mut bus) = self.source_owner.get(&source) else {
            return false;
        };
        loop {
            if *bus == self.output {
                return true;
            }
            match self.bus_owner.get(bus) {
                Some(parent) => bus = parent,
                None => return false,
            }
        }
    }

    /// Adds the output of everything feeding `bus`, recursively, into `out`.
    /// Unknown buses contribute nothing.
    pub fn render_into(
        &self,
        bus: &BusId,
        sources: &mut HashMap<SourceId, Box<Source>>,
        out: &mut [f32],
        channels: usize,
    ) {
        for node in self.inputs(bus) {
            match node {
                NodeId::Source(id) => {
                    if let Some(source) = sources.get_mut(id) {
                        source.mix_into(out, channels);
                    }
                }
                NodeId::Bus(child) => self.render_into(child, sources, out, channels),
            }
        }
    }

    /// Renders the output bus into `out`, replacing its contents.
    pub fn render_output(
        &self,
        sources: &mut HashMap<SourceId, Box<Source>>,
        out: &mut [f32],
        channels: usize,
    ) {
        out.fill(0.0);
        self.render_into(&self.output, sources, out, channels);
    }
}
