use std::marker::PhantomData;
use std::net::Ipv4Addr;

use prettytable::{cell, format, row, Cell, Row, Table};

use crate::rib::{RdePeer, RibRoute};
use crate::utils::{format_time_as_elapsed, maybe_string, u32_to_dotted, EMPTY_VALUE};

pub trait ToRow {
    fn columns() -> Row;
    fn to_row(&self) -> Row;
}

pub struct OutputTable<T: ToRow> {
    inner: Table,
    row_type: PhantomData<T>,
}

impl<T> OutputTable<T>
where
    T: ToRow,
{
    pub fn new() -> Self {
        let format = format::FormatBuilder::new()
            .padding(1, 1)
            .separator(
                format::LinePosition::Title,
                format::LineSeparator::new('-', '+', '+', '+'),
            )
            .build();
        Self::with_format(format)
    }

    pub fn with_format(format: format::TableFormat) -> Self {
        let mut table = Table::new();
        table.set_format(format);
        table.set_titles(T::columns());
        Self {
            inner: table,
            row_type: PhantomData,
        }
    }

    pub fn add_row(&mut self, row: &T) {
        self.inner.add_row(row.to_row());
    }

    /// Number of rows, not counting the title
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn print(&self) {
        self.inner.printstd();
    }
}

impl<T> Default for OutputTable<T>
where
    T: ToRow,
{
    fn default() -> Self {
        Self::new()
    }
}

/// One candidate of a network, `active` marks the selected one
pub struct RouteRow {
    pub route: RibRoute,
    pub active: bool,
}

impl RouteRow {
    fn status(&self) -> Cell {
        match (self.active, self.route.eligible) {
            (true, _) => Cell::new("*>").style_spec("Fgb"),
            (false, true) => Cell::new("*"),
            (false, false) => Cell::new(EMPTY_VALUE),
        }
    }
}

impl ToRow for RouteRow {
    fn columns() -> Row {
        row![
            "Status",
            "Prefix",
            "Neighbor",
            "Next Hop",
            "Age",
            "Origin",
            "Local Pref",
            "Metric",
            "AS Path",
            "Communities"
        ]
    }

    fn to_row(&self) -> Row {
        let attrs = &self.route.attributes;
        let mut row = Row::new(vec![self.status()]);
        for value in [
            self.route.key.to_string(),
            self.route.peer_addr.to_string(),
            maybe_string(attrs.nexthop.as_ref()),
            format_time_as_elapsed(self.route.lastchange),
            attrs.origin.to_string(),
            attrs.local_pref.to_string(),
            attrs.med.to_string(),
            attrs.as_path.to_string(),
            attrs.communities.to_string(),
        ]
        .iter()
        {
            row.add_cell(Cell::new(value));
        }
        row
    }
}

impl ToRow for RdePeer {
    fn columns() -> Row {
        row!["Neighbor", "AS", "Router ID", "State", "PfxRcd"]
    }

    fn to_row(&self) -> Row {
        row![
            self.remote_addr.to_string(),
            u32_to_dotted(self.remote_as, '.'),
            Ipv4Addr::from(self.remote_bgpid).to_string(),
            self.state.to_string(),
            self.prefix_cnt.to_string(),
        ]
    }
}
