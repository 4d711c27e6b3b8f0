pub const CURRENT_VERSION: i64 = 3;

pub const LEGACY_IM_TABLE: &str = "im_log";
pub const LEGACY_CHAT_TABLE: &str = "chat_log";

/// Flat tables written by the pre-relational releases (schema version 0).
pub const LEGACY_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS im_log (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      timestamp INTEGER NOT NULL,
      direction INTEGER NOT NULL,
      account TEXT NOT NULL,
      who TEXT NOT NULL,
      uid TEXT NOT NULL,
      message TEXT,
      UNIQUE (timestamp, message)
    );

    CREATE TABLE IF NOT EXISTS chat_log (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      timestamp INTEGER NOT NULL,
      direction INTEGER NOT NULL,
      account TEXT NOT NULL,
      room TEXT NOT NULL,
      who TEXT,
      uid TEXT NOT NULL,
      message TEXT,
      alias TEXT,
      UNIQUE (timestamp, message)
    );
"#;

/// Shape of a version 1 database: relational, but with a flat media table
/// and without avatars, previews or thread visibility.
pub const V1_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
      id INTEGER PRIMARY KEY,
      username TEXT NOT NULL,
      alias TEXT,
      type INTEGER NOT NULL,
      UNIQUE (username, type)
    );

    CREATE TABLE IF NOT EXISTS accounts (
      id INTEGER PRIMARY KEY,
      user_id INTEGER NOT NULL REFERENCES users(id),
      password TEXT,
      enabled INTEGER NOT NULL DEFAULT 0,
      protocol INTEGER NOT NULL,
      UNIQUE (user_id, protocol)
    );

    CREATE TABLE IF NOT EXISTS threads (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL,
      alias TEXT,
      account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
      type INTEGER NOT NULL,
      encrypted INTEGER NOT NULL DEFAULT 0,
      last_read_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
      UNIQUE (name, account_id, type)
    );

    CREATE TABLE IF NOT EXISTS thread_members (
      id INTEGER PRIMARY KEY,
      thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
      user_id INTEGER NOT NULL REFERENCES users(id),
      UNIQUE (thread_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS messages (
      id INTEGER PRIMARY KEY,
      uid TEXT NOT NULL,
      thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
      sender_id INTEGER REFERENCES users(id),
      user_alias TEXT,
      body TEXT NOT NULL,
      body_type INTEGER NOT NULL,
      direction INTEGER NOT NULL,
      time INTEGER NOT NULL,
      status INTEGER,
      encrypted INTEGER NOT NULL DEFAULT 0,
      UNIQUE (uid, thread_id, body, time)
    );

    CREATE TABLE IF NOT EXISTS media (
      id INTEGER PRIMARY KEY,
      name TEXT,
      url TEXT NOT NULL UNIQUE,
      path TEXT,
      mime_type TEXT,
      size INTEGER,
      width INTEGER,
      height INTEGER,
      duration INTEGER,
      status INTEGER
    );
"#;

pub const CURRENT_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS mime_type (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS files (
      id INTEGER PRIMARY KEY,
      name TEXT,
      url TEXT NOT NULL UNIQUE,
      path TEXT,
      mime_type_id INTEGER REFERENCES mime_type(id),
      size INTEGER,
      status INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS images (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      width INTEGER,
      height INTEGER
    );

    CREATE TABLE IF NOT EXISTS videos (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      width INTEGER,
      height INTEGER,
      duration INTEGER
    );

    CREATE TABLE IF NOT EXISTS audio (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      duration INTEGER
    );

    CREATE TABLE IF NOT EXISTS users (
      id INTEGER PRIMARY KEY,
      username TEXT NOT NULL,
      alias TEXT,
      avatar_id INTEGER REFERENCES files(id),
      type INTEGER NOT NULL,
      UNIQUE (username, type)
    );

    CREATE TABLE IF NOT EXISTS accounts (
      id INTEGER PRIMARY KEY,
      user_id INTEGER NOT NULL REFERENCES users(id),
      password TEXT,
      enabled INTEGER NOT NULL DEFAULT 0,
      protocol INTEGER NOT NULL,
      UNIQUE (user_id, protocol)
    );

    CREATE TABLE IF NOT EXISTS threads (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL,
      alias TEXT,
      avatar_id INTEGER REFERENCES files(id),
      account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
      type INTEGER NOT NULL,
      encrypted INTEGER NOT NULL DEFAULT 0,
      last_read_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
      visibility INTEGER NOT NULL DEFAULT 0,
      UNIQUE (name, account_id, type)
    );

    CREATE TABLE IF NOT EXISTS thread_members (
      id INTEGER PRIMARY KEY,
      thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
      user_id INTEGER NOT NULL REFERENCES users(id),
      UNIQUE (thread_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS messages (
      id INTEGER PRIMARY KEY,
      uid TEXT NOT NULL,
      thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
      sender_id INTEGER REFERENCES users(id),
      user_alias TEXT,
      body TEXT NOT NULL,
      body_type INTEGER NOT NULL,
      direction INTEGER NOT NULL,
      time INTEGER NOT NULL,
      status INTEGER,
      encrypted INTEGER NOT NULL DEFAULT 0,
      preview_id INTEGER REFERENCES files(id),
      UNIQUE (uid, thread_id, body, time)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_thread_time
      ON messages(thread_id, time DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_threads_account
      ON threads(account_id);
"#;

/// Splits the flat media table into files plus per-kind extension rows,
/// adds message previews and recreates users/threads with avatar columns.
/// Runs with foreign key enforcement off; row ids are preserved throughout.
pub const V1_TO_V2: &str = r#"
    CREATE TABLE mime_type (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE files (
      id INTEGER PRIMARY KEY,
      name TEXT,
      url TEXT NOT NULL UNIQUE,
      path TEXT,
      mime_type_id INTEGER REFERENCES mime_type(id),
      size INTEGER,
      status INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE images (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      width INTEGER,
      height INTEGER
    );

    CREATE TABLE videos (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      width INTEGER,
      height INTEGER,
      duration INTEGER
    );

    CREATE TABLE audio (
      id INTEGER PRIMARY KEY,
      file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
      duration INTEGER
    );

    INSERT INTO mime_type (name)
    SELECT DISTINCT mime_type FROM media
    WHERE mime_type IS NOT NULL AND mime_type != '';

    INSERT INTO files (id, name, url, path, mime_type_id, size, status)
    SELECT media.id, media.name, media.url, media.path, mime_type.id, media.size,
           COALESCE(media.status, 0)
    FROM media
    LEFT JOIN mime_type ON mime_type.name = media.mime_type;

    INSERT INTO images (file_id, width, height)
    SELECT id, width, height FROM media WHERE mime_type LIKE 'image/%';

    INSERT INTO videos (file_id, width, height, duration)
    SELECT id, width, height, duration FROM media WHERE mime_type LIKE 'video/%';

    INSERT INTO audio (file_id, duration)
    SELECT id, duration FROM media WHERE mime_type LIKE 'audio/%';

    DROP TABLE media;

    ALTER TABLE messages ADD COLUMN preview_id INTEGER REFERENCES files(id);

    CREATE TABLE users_new (
      id INTEGER PRIMARY KEY,
      username TEXT NOT NULL,
      alias TEXT,
      avatar_id INTEGER REFERENCES files(id),
      type INTEGER NOT NULL,
      UNIQUE (username, type)
    );
    INSERT INTO users_new (id, username, alias, type)
    SELECT id, username, alias, type FROM users;
    DROP TABLE users;
    ALTER TABLE users_new RENAME TO users;

    CREATE TABLE threads_new (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL,
      alias TEXT,
      avatar_id INTEGER REFERENCES files(id),
      account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
      type INTEGER NOT NULL,
      encrypted INTEGER NOT NULL DEFAULT 0,
      last_read_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
      UNIQUE (name, account_id, type)
    );
    INSERT INTO threads_new (id, name, alias, account_id, type, encrypted, last_read_id)
    SELECT id, name, alias, account_id, type, encrypted, last_read_id FROM threads;
    DROP TABLE threads;
    ALTER TABLE threads_new RENAME TO threads;

    CREATE INDEX IF NOT EXISTS idx_messages_thread_time
      ON messages(thread_id, time DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_threads_account
      ON threads(account_id);
"#;

pub const V2_TO_V3: &str = r#"
    ALTER TABLE threads ADD COLUMN visibility INTEGER NOT NULL DEFAULT 0;
"#;
