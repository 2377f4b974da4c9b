//! Presentation of machine records: a compact table or pretty JSON.

use comfy_table::Table;
use skiff_cluster::Machine;

pub fn table(machines: &[Machine]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(["NAME", "HOSTNAME", "PORTS", "IP", "IMAGE", "CMD"]);

    for column in table.column_iter_mut() {
        column.set_padding((0, 2));
    }

    for machine in machines {
        table.add_row([
            machine.name.clone(),
            machine.hostname.clone(),
            ports_cell(machine),
            machine.ip.clone().unwrap_or_default(),
            machine.spec.image.clone(),
            machine.spec.cmd.clone().unwrap_or_default(),
        ]);
    }
    table
}

pub fn print_table(machines: &[Machine]) {
    println!("{}", table(machines));
}

pub fn to_json(machines: &[Machine]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(machines)
}

pub fn to_json_single(machine: &Machine) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(machine)
}

fn ports_cell(machine: &Machine) -> String {
    machine
        .spec
        .port_mappings
        .iter()
        .map(|mapping| {
            let container = match &mapping.protocol {
                Some(protocol) => format!("{}/{protocol}", mapping.container_port),
                None => mapping.container_port.to_string(),
            };
            match mapping.host_port {
                Some(host_port) => format!("{host_port}->{container}"),
                None => container,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
