pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGWELL CONFIGURATION
# =============================================================================
# Logwell polls log files, turns every new line into a record, annotates it
# with a chain of processors and keeps the result queryable.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logwell/config.yml
#   3. /etc/logwell/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# WATCH
# =============================================================================
# Files are polled, not watched through OS notifications. A new line is seen
# at the earliest on the next poll, so poll_interval is also the minimum
# detection latency.

watch:
  poll_interval: 1s
  # Forget the read position of a file that has been missing this long
  missing_grace: 30s
  # Upper bound on bytes read from one file in one poll
  max_read_bytes: 1048576
  # An unterminated line this long is emitted without waiting for a newline
  max_line_bytes: 65536
  # Hash the first KiB of each file to catch a rewrite to the same size
  fingerprint: true
  skip_empty_lines: false

# =============================================================================
# SOURCES
# =============================================================================
# A path is either a single file or a directory. Directories are re-scanned on
# every poll using 'pattern' (default '*.log').
#
# start: 'beginning' (default) or 'end'. Only applies to files that exist when
# logwell starts; files created later are always read from the beginning.

sources:
  - path: /var/log/app/app.log
    start: beginning

  - path: /var/log/nginx
    pattern: '*.log'
    poll_interval: 5s
    start: end

# =============================================================================
# PARSER
# =============================================================================
# Patterns are tried in order; the first match wins. A pattern may use the
# named groups 'ts', 'level' and 'msg'. Lines that match nothing are kept with
# level UNKNOWN and the raw text as message.

parser:
  # Keep the built-in patterns after the ones listed here
  include_defaults: true
  patterns:
    - name: nginx_error
      regex: '^(?P<ts>\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) \[(?P<level>\w+)\] (?P<msg>.*)$'
      # strptime format string, 'iso8601', 'epoch', or 'epoch_ms'
      timestamp_format: '%Y/%m/%d %H:%M:%S'

# =============================================================================
# PROCESSORS
# =============================================================================
# Run in order against every record. Each one's output is stored under its
# name. 'kind' picks the implementation and defaults to the name.
#
# Available kinds:
#   severity   Records the level word the line was written with
#   patterns   Tags errors, warnings, timings, sizes, IPs, URLs, stack traces

processors:
  - name: severity
  - name: patterns
    options:
      include_defaults: true
      extra:
        auth: 'login|logout|unauthorized'

# =============================================================================
# STORAGE
# =============================================================================
# backend: memory   Keeps the newest 'capacity' records, oldest evicted first
# backend: file     Append-only JSON lines, reloaded on restart, never compacted

storage:
  backend: memory
  capacity: 10000

# storage:
#   backend: file
#   path: ~/.local/share/logwell/records.jsonl
#   fsync: false

# =============================================================================
# PIPELINE
# =============================================================================

pipeline:
  # Stop ingesting after this many storage failures in a row
  max_consecutive_store_failures: 5

# =============================================================================
# WEB (optional)
# =============================================================================
# Read-only HTTP query API. Omit this section to disable it.

web:
  listen: 127.0.0.1:7181
"#
    .to_string()
}
