use crate::error::PortSpecError;
use crate::types::Port;

/// Well-known ports and their service labels, in the order the `all` alias expands to.
const WELL_KNOWN: &[(Port, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (3306, "MySQL"),
    (6379, "Redis"),
    (27017, "MongoDB"),
];

/// The alias that expands to [`well_known_ports`].
pub const ALL_ALIAS: &str = "all";

/// Upper bound on how many ports one spec may expand to (four full port ranges).
pub const MAX_SPEC_PORTS: usize = 4 * 65_535;

/// Parse a port specification into an ordered list of ports.
///
/// Supported forms:
/// - the literal `all`: the well-known ports in table order
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comma-separated mix of the above: `22, 80, 8000-8010`
///
/// Segments keep input order and duplicates are kept. Values are not range-checked,
/// but a spec expanding to more than [`MAX_SPEC_PORTS`] ports is rejected before
/// anything is allocated for it. The first malformed segment fails the whole spec.
pub fn parse_port_spec(spec: &str) -> Result<Vec<Port>, PortSpecError> {
    if spec == ALL_ALIAS {
        return Ok(well_known_ports());
    }

    let mut out: Vec<Port> = Vec::new();
    for raw in spec.split(',') {
        let segment = raw.trim();

        if segment.contains('-') {
            let bounds: Vec<&str> = segment.split('-').collect();
            let [a, b] = bounds.as_slice() else {
                return Err(PortSpecError::InvalidRange(segment.to_string()));
            };
            let start =
                parse_number(a).ok_or_else(|| PortSpecError::InvalidStart(a.to_string()))?;
            let end = parse_number(b).ok_or_else(|| PortSpecError::InvalidEnd(b.to_string()))?;
            if start > end {
                return Err(PortSpecError::StartAfterEnd(segment.to_string()));
            }
            let span = (end - start) as usize + 1;
            if out.len() + span > MAX_SPEC_PORTS {
                return Err(PortSpecError::TooManyPorts(MAX_SPEC_PORTS));
            }
            out.extend(start..=end);
            continue;
        }

        let port = parse_number(segment)
            .ok_or_else(|| PortSpecError::InvalidPort(segment.to_string()))?;
        if out.len() >= MAX_SPEC_PORTS {
            return Err(PortSpecError::TooManyPorts(MAX_SPEC_PORTS));
        }
        out.push(port);
    }

    Ok(out)
}

/// The ports the `all` alias expands to.
pub fn well_known_ports() -> Vec<Port> {
    WELL_KNOWN.iter().map(|&(port, _)| port).collect()
}

/// Service label for a port, or `"Unknown"`.
pub fn service_name(port: Port) -> &'static str {
    WELL_KNOWN
        .iter()
        .find(|&&(p, _)| p == port)
        .map(|&(_, name)| name)
        .unwrap_or("Unknown")
}

fn parse_number(s: &str) -> Option<Port> {
    s.trim().parse::<Port>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        assert_eq!(parse_port_spec("80,443").unwrap(), vec![80, 443]);
        assert_eq!(parse_port_spec(" 443 ,  22").unwrap(), vec![443, 22]);
    }

    #[test]
    fn parse_ranges_keep_order_and_duplicates() {
        let ports = parse_port_spec("8002,8000-8002,80").unwrap();
        assert_eq!(ports, vec![8002, 8000, 8001, 8002, 80]);
        assert_eq!(parse_port_spec("1-100").unwrap().len(), 100);
        assert_eq!(parse_port_spec("5 - 7").unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn all_alias_is_table_order() {
        let ports = parse_port_spec("all").unwrap();
        assert_eq!(ports.len(), 16);
        assert_eq!(&ports[..3], &[21, 22, 23]);
        // Declaration order, not numeric: 5432 precedes 3306.
        assert_eq!(&ports[12..], &[5432, 3306, 6379, 27017]);
    }

    #[test]
    fn out_of_range_values_are_accepted() {
        assert_eq!(parse_port_spec("0,70000").unwrap(), vec![0, 70000]);
    }

    #[test]
    fn oversized_expansion_rejected() {
        assert_eq!(
            parse_port_spec("1-4000000000"),
            Err(PortSpecError::TooManyPorts(MAX_SPEC_PORTS))
        );
        assert_eq!(
            parse_port_spec("1-65535,1-65535,1-65535,1-65535").unwrap().len(),
            MAX_SPEC_PORTS
        );
        assert!(parse_port_spec("1-65535,1-65535,1-65535,1-65535,80").is_err());
    }

    #[test]
    fn invalid_values_error() {
        assert_eq!(
            parse_port_spec("abc"),
            Err(PortSpecError::InvalidPort("abc".into()))
        );
        assert_eq!(
            parse_port_spec("100-50"),
            Err(PortSpecError::StartAfterEnd("100-50".into()))
        );
        assert_eq!(
            parse_port_spec("1-2-3"),
            Err(PortSpecError::InvalidRange("1-2-3".into()))
        );
        assert!(parse_port_spec("x-5").is_err());
        assert!(parse_port_spec("5-y").is_err());
        assert!(parse_port_spec("").is_err());
        assert!(parse_port_spec("80,,443").is_err());
    }

    #[test]
    fn service_names() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(27017), "MongoDB");
        assert_eq!(service_name(9999), "Unknown");
    }
}
