/// One telemetry line emitted by the proxy, e.g.
/// `amqpprox.pausedConnectionCount,rmqEndpointType=overall:0|g`.
#[derive(Debug, PartialEq, Eq)]
pub struct StatLine<'a> {
    pub metric: &'a str,
    pub tags: Vec<(&'a str, &'a str)>,
    pub value: &'a str,
    pub kind: &'a str,
}

const PREFIX: &str = "amqpprox.";

/// Parse a single statsd line with the `amqpprox.` prefix.
///
/// Returns Err(&'static str) on error:
/// - "Prefix": line does not start with `amqpprox.`
/// - "Malformed": missing `:` / `|`, empty metric name, or a tag without `=`
/// - "NotNumeric": value does not parse as a number
pub fn parse_line(line: &str) -> Result<StatLine<'_>, &'static str> {
    let rest = line.trim().strip_prefix(PREFIX).ok_or("Prefix")?;
    let (name_and_tags, value_and_kind) = rest.split_once(':').ok_or("Malformed")?;
    let (value, kind) = value_and_kind.split_once('|').ok_or("Malformed")?;

    let mut parts = name_and_tags.split(',');
    let metric = parts.next().unwrap_or_default();
    if metric.is_empty() || kind.is_empty() {
        return Err("Malformed");
    }

    let mut tags = Vec::new();
    for tag in parts {
        let (k, v) = tag.split_once('=').ok_or("Malformed")?;
        tags.push((k, v));
    }

    if value.parse::<f64>().is_err() {
        return Err("NotNumeric");
    }

    Ok(StatLine {
        metric,
        tags,
        value,
        kind,
    })
}

/// True if any line of `datagram` is the overall paused-connection gauge.
pub fn is_paused_connection_gauge(datagram: &str) -> bool {
    datagram.lines().filter_map(|l| parse_line(l).ok()).any(|stat| {
        stat.metric == "pausedConnectionCount"
            && stat.kind == "g"
            && stat.tags.contains(&("rmqEndpointType", "overall"))
    })
}
