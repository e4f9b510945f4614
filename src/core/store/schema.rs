//! Database schema initialization
//!
//! Chain invariants for work instructions are enforced here as well as in
//! the store methods: partial unique indexes allow one latest and one
//! active row per chain, and the CHECK constraint requires an active row to
//! be the latest one.

use rusqlite::params;

use super::{Store, StoreError, SCHEMA_VERSION};

impl Store {
    /// Create every table, index, trigger and view
    pub(super) fn init_schema(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            -- Part catalog
            CREATE TABLE IF NOT EXISTS part_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT NOT NULL,
                name TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_part_definitions_number ON part_definitions(number);

            -- Part instances
            CREATE TABLE IF NOT EXISTS serializable_parts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                part_definition_id INTEGER NOT NULL
                    REFERENCES part_definitions(id) ON DELETE RESTRICT,
                serial_number TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_serializable_parts_definition ON serializable_parts(part_definition_id);
            CREATE INDEX IF NOT EXISTS idx_serializable_parts_serial ON serializable_parts(serial_number);

            -- Products
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                part_definition_id INTEGER NOT NULL
                    REFERENCES part_definitions(id) ON DELETE RESTRICT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            -- Work instruction versions
            CREATE TABLE IF NOT EXISTS work_instructions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                version TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 0,
                is_latest INTEGER NOT NULL DEFAULT 1,
                original_id INTEGER REFERENCES work_instructions(id) ON DELETE RESTRICT,
                chain_id INTEGER,
                should_generate_qr_code INTEGER NOT NULL DEFAULT 0,
                part_produced_is_serialized INTEGER NOT NULL DEFAULT 0,
                part_produced_id INTEGER REFERENCES part_definitions(id) ON DELETE RESTRICT,
                CHECK (is_active = 0 OR is_latest = 1)
            );
            CREATE INDEX IF NOT EXISTS idx_work_instructions_chain ON work_instructions(chain_id);
            CREATE UNIQUE INDEX IF NOT EXISTS ux_work_instructions_latest
                ON work_instructions(chain_id) WHERE is_latest = 1;
            CREATE UNIQUE INDEX IF NOT EXISTS ux_work_instructions_active
                ON work_instructions(chain_id) WHERE is_active = 1;

            -- chain_id = COALESCE(original_id, id), filled once the id exists
            CREATE TRIGGER IF NOT EXISTS trg_work_instructions_chain
            AFTER INSERT ON work_instructions
            WHEN NEW.chain_id IS NULL
            BEGIN
                UPDATE work_instructions
                SET chain_id = COALESCE(NEW.original_id, NEW.id)
                WHERE id = NEW.id;
            END;

            -- Nodes (shared columns), one row per step or part node
            CREATE TABLE IF NOT EXISTS work_instruction_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_instruction_id INTEGER NOT NULL
                    REFERENCES work_instructions(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                node_type TEXT NOT NULL CHECK (node_type IN ('step', 'part'))
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_instruction
                ON work_instruction_nodes(work_instruction_id, position);

            CREATE TABLE IF NOT EXISTS steps (
                id INTEGER PRIMARY KEY REFERENCES work_instruction_nodes(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                detailed_body TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS step_media (
                step_id INTEGER NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
                slot TEXT NOT NULL CHECK (slot IN ('primary', 'secondary')),
                position INTEGER NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (step_id, slot, position)
            );

            CREATE TABLE IF NOT EXISTS part_nodes (
                id INTEGER PRIMARY KEY REFERENCES work_instruction_nodes(id) ON DELETE CASCADE,
                part_definition_id INTEGER NOT NULL
                    REFERENCES part_definitions(id) ON DELETE RESTRICT,
                input_type TEXT NOT NULL
                    CHECK (input_type IN ('serial_number', 'production_log_id')),
                quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity > 0)
            );

            CREATE TABLE IF NOT EXISTS work_instruction_products (
                work_instruction_id INTEGER NOT NULL
                    REFERENCES work_instructions(id) ON DELETE CASCADE,
                product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                PRIMARY KEY (work_instruction_id, product_id)
            );
            CREATE INDEX IF NOT EXISTS idx_wi_products_product ON work_instruction_products(product_id);

            -- Production logs
            CREATE TABLE IF NOT EXISTS production_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE RESTRICT,
                work_instruction_id INTEGER NOT NULL
                    REFERENCES work_instructions(id) ON DELETE RESTRICT,
                operator_id TEXT NOT NULL,
                from_batch_of INTEGER NOT NULL DEFAULT 1,
                created_on TEXT NOT NULL,
                last_modified_on TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_production_logs_instruction ON production_logs(work_instruction_id);
            CREATE INDEX IF NOT EXISTS idx_production_logs_product ON production_logs(product_id);

            CREATE TABLE IF NOT EXISTS production_log_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                production_log_id INTEGER NOT NULL
                    REFERENCES production_logs(id) ON DELETE CASCADE,
                work_instruction_step_id INTEGER NOT NULL REFERENCES steps(id) ON DELETE RESTRICT,
                UNIQUE (production_log_id, work_instruction_step_id)
            );

            CREATE TABLE IF NOT EXISTS production_log_step_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                production_log_step_id INTEGER NOT NULL
                    REFERENCES production_log_steps(id) ON DELETE CASCADE,
                success INTEGER,
                notes TEXT NOT NULL DEFAULT '',
                submit_time TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_step ON production_log_step_attempts(production_log_step_id);

            -- Traceability ledger
            CREATE TABLE IF NOT EXISTS production_log_parts (
                production_log_id INTEGER NOT NULL
                    REFERENCES production_logs(id) ON DELETE CASCADE,
                serializable_part_id INTEGER NOT NULL
                    REFERENCES serializable_parts(id) ON DELETE RESTRICT,
                operation_type TEXT NOT NULL
                    CHECK (operation_type IN ('installed', 'produced', 'removed')),
                PRIMARY KEY (production_log_id, serializable_part_id, operation_type)
            );
            CREATE INDEX IF NOT EXISTS idx_log_parts_part ON production_log_parts(serializable_part_id);

            CREATE TRIGGER IF NOT EXISTS trg_production_log_parts_append_only
            BEFORE UPDATE ON production_log_parts
            BEGIN
                SELECT RAISE(ABORT, 'production_log_parts is append-only');
            END;

            -- Reporting views
            CREATE VIEW IF NOT EXISTS production_view AS
            SELECT
                pl.id AS production_log_id,
                pl.created_on,
                pl.last_modified_on,
                pl.operator_id,
                pl.from_batch_of,
                pd.number AS product_number,
                pd.name AS product_name,
                wi.id AS work_instruction_id,
                wi.title AS work_instruction_title,
                wi.version AS work_instruction_version,
                (
                    SELECT sp.serial_number
                    FROM production_log_parts plp
                    JOIN serializable_parts sp ON sp.id = plp.serializable_part_id
                    WHERE plp.production_log_id = pl.id AND plp.operation_type = 'produced'
                    LIMIT 1
                ) AS produced_serial
            FROM production_logs pl
            JOIN products p ON p.id = pl.product_id
            JOIN part_definitions pd ON pd.id = p.part_definition_id
            JOIN work_instructions wi ON wi.id = pl.work_instruction_id;

            CREATE VIEW IF NOT EXISTS traceability_view AS
            SELECT
                plp.production_log_id,
                plp.operation_type,
                sp.id AS serializable_part_id,
                sp.serial_number,
                pd.number AS part_number,
                pd.name AS part_name,
                ppd.number AS product_number,
                pl.created_on AS logged_on
            FROM production_log_parts plp
            JOIN serializable_parts sp ON sp.id = plp.serializable_part_id
            JOIN part_definitions pd ON pd.id = sp.part_definition_id
            JOIN production_logs pl ON pl.id = plp.production_log_id
            JOIN products p ON p.id = pl.product_id
            JOIN part_definitions ppd ON ppd.id = p.part_definition_id;

            CREATE VIEW IF NOT EXISTS fpy_attempts_view AS
            SELECT
                pls.production_log_id,
                pls.id AS production_log_step_id,
                pls.work_instruction_step_id,
                s.name AS step_name,
                pl.work_instruction_id,
                COUNT(a.id) AS attempt_count,
                (
                    SELECT a1.success
                    FROM production_log_step_attempts a1
                    WHERE a1.production_log_step_id = pls.id
                    ORDER BY a1.id
                    LIMIT 1
                ) AS first_attempt_success,
                MAX(CASE WHEN a.success = 1 THEN 1 ELSE 0 END) AS ever_succeeded
            FROM production_log_steps pls
            JOIN production_logs pl ON pl.id = pls.production_log_id
            JOIN steps s ON s.id = pls.work_instruction_step_id
            LEFT JOIN production_log_step_attempts a ON a.production_log_step_id = pls.id
            GROUP BY pls.id;
            "#,
        )?;

        tx.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        tx.commit()?;

        tracing::info!(version = SCHEMA_VERSION, "initialized database schema");
        Ok(())
    }
}
